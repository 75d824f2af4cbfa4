use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the change feed and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A new message was persisted
    MessageCreate { message: Message },

    /// An existing message changed: edit, pin, or reaction
    MessageUpdate { message: Message },

    /// A message was soft-deleted (the record is a tombstone)
    MessageDelete { message: Message },
}

impl GatewayEvent {
    /// Returns the channel_id if this event is scoped to a specific channel.
    /// Events that return `None` are connection-level.
    pub fn channel_id(&self) -> Option<Uuid> {
        self.message().map(|m| m.channel_id)
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::MessageCreate { message }
            | Self::MessageUpdate { message }
            | Self::MessageDelete { message } => Some(message),
            Self::Ready { .. } => None,
        }
    }

    /// Strips tombstoned bodies before the event leaves the server.
    pub fn redacted(self) -> Self {
        match self {
            Self::MessageCreate { message } => Self::MessageCreate { message: message.redacted() },
            Self::MessageUpdate { message } => Self::MessageUpdate { message: message.redacted() },
            Self::MessageDelete { message } => Self::MessageDelete { message: message.redacted() },
            ready => ready,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific channels.
    /// Replaces the previous subscription set.
    Subscribe { channel_ids: Vec<Uuid> },
}
