//! Optimistic send, edit, soft delete and pin.
//!
//! Each mutation patches the window first, then persists, then either
//! adopts the store's record or rolls back. Responses for a view that has
//! since moved to another channel are handed to the caller but never touch
//! the window.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::models::{Message, MessageMetadata};

use crate::error::SyncError;
use crate::store::{MessagePatch, NewMessage, RecordStore, StoreError};
use crate::view::{ChannelView, ViewToken};
use crate::window::Delivery;

/// Trims `body` and checks it is non-empty and at most `max_chars` long.
pub fn validate_body(body: &str, max_chars: usize) -> Result<String, SyncError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(SyncError::Validation("message body is empty".into()));
    }
    if body.chars().count() > max_chars {
        return Err(SyncError::Validation(format!(
            "message body is longer than {} characters",
            max_chars
        )));
    }
    Ok(body.to_string())
}

impl<S: RecordStore> ChannelView<S> {
    /// Sends `body` to the active channel.
    ///
    /// The message shows up at once under a temporary id with
    /// [`Delivery::Pending`]. On success the entry takes the stored id in
    /// place; on failure it stays as [`Delivery::Failed`] for
    /// [`retry_send`](Self::retry_send) or [`discard_failed`](Self::discard_failed).
    pub async fn send(&self, body: &str) -> Result<Message, SyncError> {
        let result = self.send_inner(body).await;
        self.surface(result)
    }

    async fn send_inner(&self, body: &str) -> Result<Message, SyncError> {
        let body = validate_body(body, self.config.max_body_chars)?;
        let user = self.current_user()?;
        let nonce = Uuid::new_v4();
        let temp_id = Uuid::new_v4();

        let token = {
            let mut state = self.lock();
            let token = state.require_token()?;
            let now = Utc::now();
            state.window.push_pending(Message {
                id: temp_id,
                channel_id: token.channel_id,
                author_id: user.id,
                author_username: user.username.clone(),
                author_display_name: user.display_name.clone(),
                body: body.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
                nonce: Some(nonce),
                metadata: MessageMetadata::default(),
            });
            token
        };

        let result = self
            .store
            .insert_message(NewMessage {
                channel_id: token.channel_id,
                author_id: user.id,
                body,
                nonce,
            })
            .await;
        self.settle_send(token, temp_id, result)
    }

    /// Re-issues a failed send with its original nonce, so a first attempt
    /// that did reach the store is not stored twice.
    pub async fn retry_send(&self, temp_id: Uuid) -> Result<Message, SyncError> {
        let result = self.retry_send_inner(temp_id).await;
        self.surface(result)
    }

    async fn retry_send_inner(&self, temp_id: Uuid) -> Result<Message, SyncError> {
        let user = self.current_user()?;
        let (token, request) = {
            let mut state = self.lock();
            let token = state.require_token()?;
            let entry = state
                .window
                .get_mut(temp_id)
                .ok_or_else(|| SyncError::NotFound(format!("message {}", temp_id)))?;
            if !matches!(entry.delivery, Delivery::Failed { .. }) {
                return Err(SyncError::Validation("only a failed send can be retried".into()));
            }
            let nonce = entry
                .message
                .nonce
                .ok_or_else(|| SyncError::Validation("message has no send nonce".into()))?;
            entry.delivery = Delivery::Pending;
            let request = NewMessage {
                channel_id: token.channel_id,
                author_id: user.id,
                body: entry.message.body.clone(),
                nonce,
            };
            (token, request)
        };

        debug!("Retrying send {} with nonce {}", temp_id, request.nonce);
        let result = self.store.insert_message(request).await;
        self.settle_send(token, temp_id, result)
    }

    /// Drops a failed send from the window.
    pub fn discard_failed(&self, temp_id: Uuid) -> Result<(), SyncError> {
        let result = {
            let mut state = self.lock();
            let delivery = state.window.get(temp_id).map(|e| e.delivery.clone());
            match delivery {
                Some(Delivery::Failed { .. }) => {
                    state.window.remove(temp_id);
                    Ok(())
                }
                Some(_) => Err(SyncError::Validation("only a failed send can be discarded".into())),
                None => Err(SyncError::NotFound(format!("message {}", temp_id))),
            }
        };
        self.surface(result)
    }

    /// Replaces the body of one of the current user's messages.
    pub async fn edit(&self, message_id: Uuid, body: &str) -> Result<Message, SyncError> {
        let result = self.edit_inner(message_id, body).await;
        self.surface(result)
    }

    async fn edit_inner(&self, message_id: Uuid, body: &str) -> Result<Message, SyncError> {
        let body = validate_body(body, self.config.max_body_chars)?;
        let user = self.current_user()?;

        let (token, snapshot) = {
            let mut state = self.lock();
            let token = state.require_token()?;
            let entry = state.editable(message_id, "edit")?;
            if entry.message.author_id != user.id {
                return Err(SyncError::Forbidden("only the author can edit a message".into()));
            }
            let snapshot = entry.message.clone();
            entry.message.body = body.clone();
            entry.message.metadata.edited = true;
            entry.message.metadata.edited_at = Some(Utc::now());
            (token, snapshot)
        };

        let result = self.store.update_message(message_id, MessagePatch::Edit { body }).await;
        self.settle_update(token, snapshot, result).await
    }

    /// Tombstones one of the current user's messages. The record is kept;
    /// projections show a placeholder instead of its body.
    pub async fn soft_delete(&self, message_id: Uuid) -> Result<Message, SyncError> {
        let result = self.soft_delete_inner(message_id).await;
        self.surface(result)
    }

    async fn soft_delete_inner(&self, message_id: Uuid) -> Result<Message, SyncError> {
        let user = self.current_user()?;

        let (token, snapshot) = {
            let mut state = self.lock();
            let token = state.require_token()?;
            let entry = state.editable(message_id, "delete")?;
            if entry.message.author_id != user.id {
                return Err(SyncError::Forbidden("only the author can delete a message".into()));
            }
            let snapshot = entry.message.clone();
            let now = Utc::now();
            entry.message.deleted_at = Some(now);
            entry.message.metadata.deleted = true;
            entry.message.metadata.deleted_at = Some(now);
            entry.message.metadata.deleted_by = Some(user.id);
            (token, snapshot)
        };

        let result = self
            .store
            .update_message(message_id, MessagePatch::SoftDelete { by: user.id })
            .await;
        self.settle_update(token, snapshot, result).await
    }

    /// Pins or unpins a message. Any member may do this; the last writer wins.
    pub async fn toggle_pin(&self, message_id: Uuid) -> Result<Message, SyncError> {
        let result = self.toggle_pin_inner(message_id).await;
        self.surface(result)
    }

    async fn toggle_pin_inner(&self, message_id: Uuid) -> Result<Message, SyncError> {
        let user = self.current_user()?;

        let (token, snapshot, patch) = {
            let mut state = self.lock();
            let token = state.require_token()?;
            let entry = state.editable(message_id, "pin")?;
            let snapshot = entry.message.clone();
            let meta = &mut entry.message.metadata;
            let patch = if meta.pinned {
                meta.pinned = false;
                meta.pinned_at = None;
                meta.pinned_by = None;
                MessagePatch::Unpin
            } else {
                meta.pinned = true;
                meta.pinned_at = Some(Utc::now());
                meta.pinned_by = Some(user.id);
                MessagePatch::Pin { by: user.id }
            };
            (token, snapshot, patch)
        };

        let result = self.store.update_message(message_id, patch).await;
        self.settle_update(token, snapshot, result).await
    }

    fn settle_send(
        &self,
        token: ViewToken,
        temp_id: Uuid,
        result: Result<Message, StoreError>,
    ) -> Result<Message, SyncError> {
        let mut state = self.lock();
        if !state.is_current(token) {
            debug!("Send {} settled after the view left channel {}", temp_id, token.channel_id);
            return result.map_err(SyncError::from);
        }
        match result {
            Ok(message) => {
                state.window.confirm_send(temp_id, message.clone());
                debug!("Send {} confirmed as {}", temp_id, message.id);
                Ok(message)
            }
            Err(e) => {
                warn!("Send {} failed: {}", temp_id, e);
                state.window.set_delivery(temp_id, Delivery::Failed { reason: e.to_string() });
                Err(e.into())
            }
        }
    }

    /// Adopts the store's answer to an optimistic change, or rolls the
    /// message back when persisting failed.
    pub(crate) async fn settle_update(
        &self,
        token: ViewToken,
        snapshot: Message,
        result: Result<Message, StoreError>,
    ) -> Result<Message, SyncError> {
        match result {
            Ok(message) => {
                self.adopt(token, message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!("Change to message {} failed, rolling back: {}", snapshot.id, e);
                self.rollback(token, snapshot).await;
                Err(e.into())
            }
        }
    }

    /// Restores the stored version of a message, or `snapshot` if the store
    /// cannot be read either.
    async fn rollback(&self, token: ViewToken, snapshot: Message) {
        let restored = match self.store.message(snapshot.id).await {
            Ok(Some(message)) => message,
            Ok(None) => snapshot,
            Err(e) => {
                warn!("Re-fetch of message {} failed: {}", snapshot.id, e);
                snapshot
            }
        };
        self.adopt(token, restored);
    }

    /// Writes an authoritative version into the window unless the window
    /// already holds a newer one.
    fn adopt(&self, token: ViewToken, message: Message) {
        let mut state = self.lock();
        if !state.is_current(token) {
            return;
        }
        let newer_local = state
            .window
            .get(message.id)
            .is_some_and(|e| e.message.updated_at > message.updated_at);
        if !newer_local {
            state.window.replace(message);
        }
    }
}
