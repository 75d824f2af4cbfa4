use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text rendered in place of a soft-deleted message body.
pub const TOMBSTONE_PLACEHOLDER: &str = "[message deleted]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Text,
    Announcement,
    Thread,
    EventChat,
    DirectMessage,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Announcement => "ANNOUNCEMENT",
            Self::Thread => "THREAD",
            Self::EventChat => "EVENT_CHAT",
            Self::DirectMessage => "DIRECT_MESSAGE",
        }
    }
}

impl FromStr for ChannelKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(Self::Text),
            "ANNOUNCEMENT" => Ok(Self::Announcement),
            "THREAD" => Ok(Self::Thread),
            "EVENT_CHAT" => Ok(Self::EventChat),
            "DIRECT_MESSAGE" => Ok(Self::DirectMessage),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Owner,
    Admin,
    Moderator,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Moderator => "MODERATOR",
            Self::Member => "MEMBER",
        }
    }
}

impl FromStr for MemberRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OWNER" => Ok(Self::Owner),
            "ADMIN" => Ok(Self::Admin),
            "MODERATOR" => Ok(Self::Moderator),
            "MEMBER" => Ok(Self::Member),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A stored enum column held a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kind: ChannelKind,
    pub is_private: bool,
    pub is_direct: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMembership {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
}

/// A channel the requesting user is authorized to read, with its member count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedChannel {
    pub channel: Channel,
    pub member_count: u64,
}

/// Aggregated reactions for one emoji on one message.
///
/// `count` always equals `user_ids.len()` and `user_ids` is never empty;
/// an entry whose last user leaves is removed from the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub emoji: String,
    pub count: usize,
    pub user_ids: BTreeSet<Uuid>,
}

impl ReactionEntry {
    pub fn new(emoji: impl Into<String>, user_ids: BTreeSet<Uuid>) -> Self {
        Self {
            emoji: emoji.into(),
            count: user_ids.len(),
            user_ids,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub pinned_by: Option<Uuid>,
    pub deleted: bool,
    pub deleted_by: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<ReactionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub author_display_name: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Client-generated nonce of the send that produced this message.
    pub nonce: Option<Uuid>,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The body as it may be shown to a user: tombstones never expose `body`.
    pub fn rendered_body(&self) -> &str {
        if self.is_deleted() {
            TOMBSTONE_PLACEHOLDER
        } else {
            &self.body
        }
    }

    /// Copy with the body of a tombstone blanked out, for leaving the store.
    pub fn redacted(mut self) -> Self {
        if self.is_deleted() {
            self.body.clear();
        }
        self
    }

    /// The `(created_at, id)` ordering key used by cursor pagination.
    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Position of the oldest loaded message; a page holds rows strictly older.
/// Orders by `created_at`, then `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}
