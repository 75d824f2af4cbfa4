//! The persistent record store the core reads from and writes to.

mod embedded;

use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

use parley_gateway::dispatcher::ChannelSubscription;
use parley_types::models::{Channel, ChannelKind, ChannelMembership, MemberRole, Message, PageCursor};

use crate::reactions::ReactionOp;

pub use embedded::EmbeddedStore;

/// Most rows a single page may hold, whatever the caller asks for.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("write rejected: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub slug: String,
    pub name: String,
    pub kind: ChannelKind,
    pub is_private: bool,
    pub is_direct: bool,
    pub created_by: Uuid,
}

/// Result of a slug-guarded channel insert.
#[derive(Debug, Clone)]
pub enum ChannelInsert {
    /// This call created the channel and the creator's OWNER membership.
    Created(Channel),
    /// The slug was already taken; this is the channel holding it.
    Existing(Channel),
}

impl ChannelInsert {
    pub fn into_channel(self) -> Channel {
        match self {
            Self::Created(channel) | Self::Existing(channel) => channel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    /// Retrying with the same nonce returns the first attempt's record.
    pub nonce: Uuid,
}

/// A last-writer-wins change to one message. The store stamps the write.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePatch {
    Edit { body: String },
    SoftDelete { by: Uuid },
    Pin { by: Uuid },
    Unpin,
}

/// Create/read/update access to channels and messages, plus a per-channel
/// change feed. Every write that changes a message is announced on the feed.
///
/// Each accepted message write, reactions included, gets an `updated_at`
/// strictly later than the one before it, so readers can order versions of
/// a message by that field alone.
pub trait RecordStore: Send + Sync + 'static {
    fn channel_by_id(&self, id: Uuid) -> impl Future<Output = Result<Option<Channel>, StoreError>> + Send;

    fn channel_by_slug(&self, slug: &str) -> impl Future<Output = Result<Option<Channel>, StoreError>> + Send;

    /// Guarded by the unique slug: concurrent creators get one `Created`,
    /// everyone else `Existing`.
    fn create_channel(&self, channel: NewChannel) -> impl Future<Output = Result<ChannelInsert, StoreError>> + Send;

    fn membership(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<ChannelMembership>, StoreError>> + Send;

    /// Idempotent; returns whether a row was written.
    fn add_membership(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn member_count(&self, channel_id: Uuid) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Up to `limit` messages strictly older than `before`, newest first.
    /// Limits above [`MAX_PAGE_SIZE`] are cut down to it.
    fn messages_page(
        &self,
        channel_id: Uuid,
        before: Option<PageCursor>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    fn message(&self, id: Uuid) -> impl Future<Output = Result<Option<Message>, StoreError>> + Send;

    fn insert_message(&self, message: NewMessage) -> impl Future<Output = Result<Message, StoreError>> + Send;

    fn update_message(
        &self,
        id: Uuid,
        patch: MessagePatch,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Adds or removes the single `(message, emoji, user)` reaction fact.
    /// Both directions are idempotent, so concurrent toggles commute.
    fn react(
        &self,
        message_id: Uuid,
        op: ReactionOp,
        emoji: &str,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Change feed for one channel; dropping the subscription unsubscribes.
    fn subscribe(&self, channel_id: Uuid) -> ChannelSubscription;
}
