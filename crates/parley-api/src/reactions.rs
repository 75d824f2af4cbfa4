use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use parley_sync::reactions::{ReactionOp, toggle};
use parley_sync::RecordStore;
use parley_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};

use crate::auth::AppState;
use crate::error::store_status;
use crate::messages::message_in_channel;

/// `POST /channels/{id}/messages/{mid}/reactions`: toggles the caller's
/// reaction. Only the caller's own `(message, emoji, user)` fact is written.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, StatusCode> {
    let emoji = req.emoji.trim();
    if emoji.is_empty() || emoji.len() > state.config.max_emoji_bytes {
        return Err(StatusCode::BAD_REQUEST);
    }

    let current = message_in_channel(&state, channel_id, message_id, claims.sub).await?;
    let (_, op) = toggle(&current.metadata.reactions, emoji, claims.sub);

    let message = state
        .store
        .react(message_id, op, emoji, claims.sub)
        .await
        .map_err(store_status)?;

    Ok(Json(ToggleReactionResponse {
        added: op == ReactionOp::Add,
        message: message.redacted(),
    }))
}
