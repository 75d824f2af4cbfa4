use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use parley_sync::mutations::validate_body;
use parley_sync::store::{MessagePatch, NewMessage, MAX_PAGE_SIZE};
use parley_sync::RecordStore;
use parley_types::api::{Claims, EditMessageRequest, SendMessageRequest};
use parley_types::models::{Message, PageCursor};

use crate::auth::AppState;
use crate::channels::authorize;
use crate::error::{store_status, sync_status};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Cursor-based pagination: pass the `created_at` and `id` of the oldest
    /// message from the previous page to fetch older messages.
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<Uuid>,
}

/// `GET /channels/{id}/messages`: one page, newest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    authorize(&state, &channel_id.to_string(), claims.sub).await?;

    let before = match (query.before, query.before_id) {
        (Some(created_at), Some(id)) => Some(PageCursor { created_at, id }),
        (None, None) => None,
        _ => return Err(StatusCode::BAD_REQUEST),
    };
    let limit = query.limit.unwrap_or(state.config.page_limit()).clamp(1, MAX_PAGE_SIZE);

    let page = state
        .store
        .messages_page(channel_id, before, limit)
        .await
        .map_err(store_status)?;
    Ok(Json(page.into_iter().map(Message::redacted).collect()))
}

/// `POST /channels/{id}/messages`. Repeating a request with the same nonce
/// returns the first message instead of storing a second one.
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &channel_id.to_string(), claims.sub).await?;
    let body = validate_body(&req.body, state.config.max_body_chars).map_err(sync_status)?;

    let message = state
        .store
        .insert_message(NewMessage {
            channel_id,
            author_id: claims.sub,
            body,
            nonce: req.nonce.unwrap_or_else(Uuid::new_v4),
        })
        .await
        .map_err(store_status)?;

    debug!("{} sent {} to {}", claims.username, message.id, channel_id);
    Ok((StatusCode::CREATED, Json(message)))
}

/// `PATCH /channels/{id}/messages/{mid}`: author only.
pub async fn edit_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Message>, StatusCode> {
    let current = message_in_channel(&state, channel_id, message_id, claims.sub).await?;
    if current.author_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }
    let body = validate_body(&req.body, state.config.max_body_chars).map_err(sync_status)?;

    let message = state
        .store
        .update_message(message_id, MessagePatch::Edit { body })
        .await
        .map_err(store_status)?;
    Ok(Json(message.redacted()))
}

/// `DELETE /channels/{id}/messages/{mid}`: author only. Leaves a tombstone.
pub async fn delete_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Message>, StatusCode> {
    let current = message_in_channel(&state, channel_id, message_id, claims.sub).await?;
    if current.author_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    let message = state
        .store
        .update_message(message_id, MessagePatch::SoftDelete { by: claims.sub })
        .await
        .map_err(store_status)?;
    Ok(Json(message.redacted()))
}

/// `POST /channels/{id}/messages/{mid}/pin`: flips the pin. Any member may.
pub async fn toggle_pin(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Message>, StatusCode> {
    let current = message_in_channel(&state, channel_id, message_id, claims.sub).await?;
    let patch = if current.metadata.pinned {
        MessagePatch::Unpin
    } else {
        MessagePatch::Pin { by: claims.sub }
    };

    let message = state
        .store
        .update_message(message_id, patch)
        .await
        .map_err(store_status)?;
    Ok(Json(message.redacted()))
}

/// Loads a message after checking the user may read its channel. A message
/// from another channel is reported as missing.
pub(crate) async fn message_in_channel(
    state: &AppState,
    channel_id: Uuid,
    message_id: Uuid,
    user_id: Uuid,
) -> Result<Message, StatusCode> {
    authorize(state, &channel_id.to_string(), user_id).await?;
    state
        .store
        .message(message_id)
        .await
        .map_err(store_status)?
        .filter(|m| m.channel_id == channel_id)
        .ok_or(StatusCode::NOT_FOUND)
}
