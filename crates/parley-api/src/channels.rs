use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use parley_sync::ChannelResolver;
use parley_types::api::Claims;
use parley_types::models::ResolvedChannel;

use crate::auth::AppState;
use crate::error::sync_status;

/// `GET /channels/{ident}`: resolve an id or slug, joining public channels.
pub async fn get_channel(
    State(state): State<AppState>,
    Path(ident): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ResolvedChannel>, StatusCode> {
    let resolved = authorize(&state, &ident, claims.sub).await?;
    Ok(Json(resolved))
}

/// Resolves `ident` for `user_id` with the same rules clients get: the
/// default channel is bootstrapped, public channels are joined, private
/// ones are 404 to non-members.
pub(crate) async fn authorize(state: &AppState, ident: &str, user_id: Uuid) -> Result<ResolvedChannel, StatusCode> {
    ChannelResolver::new(state.store.clone(), &state.config)
        .resolve(ident, user_id)
        .await
        .map_err(sync_status)
}
