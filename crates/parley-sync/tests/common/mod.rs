#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tempfile::TempDir;
use uuid::Uuid;

use parley_gateway::dispatcher::ChannelSubscription;
use parley_sync::store::{ChannelInsert, MessagePatch, NewChannel, NewMessage};
use parley_sync::{
    ChannelView, EmbeddedStore, ErrorKind, ErrorSink, ReactionOp, RecordStore, SessionHandle, SessionUser,
    StoreError, SyncConfig,
};
use parley_types::models::{Channel, ChannelKind, ChannelMembership, MemberRole, Message, PageCursor};

// ─── Fixture ─────────────────────────────────────────────────────────────────

/// A fresh on-disk store with two registered users.
pub struct Fixture {
    _dir: TempDir,
    pub store: Arc<EmbeddedStore>,
    pub ada: SessionUser,
    pub bob: SessionUser,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(&dir.path().join("parley.db")).unwrap();
        let ada = register(&store, "ada", Some("Ada Lovelace")).await;
        let bob = register(&store, "bob", None).await;
        Self {
            _dir: dir,
            store: Arc::new(store),
            ada,
            bob,
        }
    }

    pub fn view(&self, user: &SessionUser) -> (ChannelView<EmbeddedStore>, Arc<RecordingSink>) {
        view_on(self.store.clone(), user, SyncConfig::default())
    }

    /// Creates a channel owned by `owner`.
    pub async fn channel(&self, slug: &str, private: bool, owner: &SessionUser) -> Channel {
        let insert = self
            .store
            .create_channel(NewChannel {
                slug: slug.into(),
                name: slug.into(),
                kind: ChannelKind::Text,
                is_private: private,
                is_direct: false,
                created_by: owner.id,
            })
            .await
            .unwrap();
        match insert {
            ChannelInsert::Created(channel) => channel,
            ChannelInsert::Existing(channel) => panic!("slug {} already taken by {}", slug, channel.id),
        }
    }

    /// Stores a message directly, bypassing any view.
    pub async fn post(&self, channel_id: Uuid, author: &SessionUser, body: &str) -> Message {
        self.store
            .insert_message(NewMessage {
                channel_id,
                author_id: author.id,
                body: body.into(),
                nonce: Uuid::new_v4(),
            })
            .await
            .unwrap()
    }
}

pub async fn register(store: &EmbeddedStore, username: &str, display_name: Option<&str>) -> SessionUser {
    let user = store.register_user(username, "not-a-real-hash", display_name).await.unwrap();
    SessionUser {
        id: user.id,
        username: user.username,
        display_name: user.display_name,
    }
}

pub fn view_on<S: RecordStore>(
    store: Arc<S>,
    user: &SessionUser,
    config: SyncConfig,
) -> (ChannelView<S>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let session = Arc::new(SessionHandle::signed_in(user.clone()));
    (ChannelView::new(store, session, sink.clone(), config), sink)
}

/// Polls `check` until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ─── Error sink ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(ErrorKind, String)>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.reports.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().unwrap().is_empty()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, kind: ErrorKind, message: &str) {
        self.reports.lock().unwrap().push((kind, message.to_string()));
    }
}

// ─── Failure injection ───────────────────────────────────────────────────────

/// Wraps a store to fail or slow down selected calls.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_pages: AtomicBool,
    page_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
}

impl<S: RecordStore> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_pages: AtomicBool::new(false),
            page_delay_ms: AtomicU64::new(0),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_page_delay(&self, delay: Duration) {
        self.page_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Holds every write back by `delay` before it reaches the store.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Self::injected(&self.fail_writes)
    }

    fn injected(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend(anyhow!("injected failure")))
        } else {
            Ok(())
        }
    }
}

impl<S: RecordStore> RecordStore for FlakyStore<S> {
    async fn channel_by_id(&self, id: Uuid) -> Result<Option<Channel>, StoreError> {
        self.inner.channel_by_id(id).await
    }

    async fn channel_by_slug(&self, slug: &str) -> Result<Option<Channel>, StoreError> {
        self.inner.channel_by_slug(slug).await
    }

    async fn create_channel(&self, channel: NewChannel) -> Result<ChannelInsert, StoreError> {
        self.inner.create_channel(channel).await
    }

    async fn membership(&self, channel_id: Uuid, user_id: Uuid) -> Result<Option<ChannelMembership>, StoreError> {
        self.inner.membership(channel_id, user_id).await
    }

    async fn add_membership(&self, channel_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<bool, StoreError> {
        self.inner.add_membership(channel_id, user_id, role).await
    }

    async fn member_count(&self, channel_id: Uuid) -> Result<u64, StoreError> {
        self.inner.member_count(channel_id).await
    }

    async fn messages_page(
        &self,
        channel_id: Uuid,
        before: Option<PageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let delay = self.page_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Self::injected(&self.fail_pages)?;
        self.inner.messages_page(channel_id, before, limit).await
    }

    async fn message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Self::injected(&self.fail_reads)?;
        self.inner.message(id).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.before_write().await?;
        self.inner.insert_message(message).await
    }

    async fn update_message(&self, id: Uuid, patch: MessagePatch) -> Result<Message, StoreError> {
        self.before_write().await?;
        self.inner.update_message(id, patch).await
    }

    async fn react(&self, message_id: Uuid, op: ReactionOp, emoji: &str, user_id: Uuid) -> Result<Message, StoreError> {
        self.before_write().await?;
        self.inner.react(message_id, op, emoji, user_id).await
    }

    fn subscribe(&self, channel_id: Uuid) -> ChannelSubscription {
        self.inner.subscribe(channel_id)
    }
}
