use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};
use uuid::Uuid;

use parley_types::models::ResolvedChannel;

use crate::config::SyncConfig;
use crate::error::{ErrorSink, SyncError};
use crate::history::HistoryState;
use crate::live::{self, FeedHandle};
use crate::resolver::ChannelResolver;
use crate::search;
use crate::session::{Session, SessionUser};
use crate::store::RecordStore;
use crate::window::{LocalMessage, MessageProjection, MessageWindow};

/// Identifies one opening of one channel. Responses carrying a token that
/// no longer matches the view are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViewToken {
    pub channel_id: Uuid,
    pub generation: u64,
}

#[derive(Default)]
pub(crate) struct ViewState {
    pub generation: u64,
    pub active: Option<ResolvedChannel>,
    pub window: MessageWindow,
    pub history: HistoryState,
    pub feed: Option<FeedHandle>,
}

impl ViewState {
    pub fn token(&self) -> Option<ViewToken> {
        self.active.as_ref().map(|a| ViewToken {
            channel_id: a.channel.id,
            generation: self.generation,
        })
    }

    pub fn require_token(&self) -> Result<ViewToken, SyncError> {
        self.token()
            .ok_or_else(|| SyncError::NotFound("no channel is open".into()))
    }

    pub fn is_current(&self, token: ViewToken) -> bool {
        self.token() == Some(token)
    }

    /// Starts a new generation: everything issued for the previous one
    /// becomes stale and its feed is unsubscribed.
    fn reset(&mut self, active: Option<ResolvedChannel>) -> u64 {
        self.generation += 1;
        self.active = active;
        self.window.clear();
        self.history = HistoryState::default();
        if let Some(feed) = self.feed.take() {
            feed.unsubscribe();
        }
        self.generation
    }

    /// A confirmed, live message the user may change.
    pub fn editable(&mut self, message_id: Uuid, action: &str) -> Result<&mut LocalMessage, SyncError> {
        let entry = self
            .window
            .get_mut(message_id)
            .ok_or_else(|| SyncError::NotFound(format!("message {}", message_id)))?;
        if !entry.is_confirmed() {
            return Err(SyncError::Validation(format!("cannot {} a message that is not sent yet", action)));
        }
        if entry.message.is_deleted() {
            return Err(SyncError::Validation(format!("cannot {} a deleted message", action)));
        }
        Ok(entry)
    }
}

pub(crate) fn lock_state(state: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// The single owner of one client's view of one channel.
///
/// Every write to the message window (history pages, live events,
/// optimistic mutations and their confirmations) goes through the view's
/// state lock. The lock is never held across a store call.
pub struct ChannelView<S: RecordStore> {
    pub(crate) store: Arc<S>,
    pub(crate) session: Arc<dyn Session>,
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) config: SyncConfig,
    pub(crate) state: Arc<Mutex<ViewState>>,
}

impl<S: RecordStore> ChannelView<S> {
    pub fn new(store: Arc<S>, session: Arc<dyn Session>, sink: Arc<dyn ErrorSink>, config: SyncConfig) -> Self {
        Self {
            store,
            session,
            sink,
            config,
            state: Arc::new(Mutex::new(ViewState::default())),
        }
    }

    /// Resolves `identifier`, switches the view to that channel, subscribes
    /// to its feed and loads the newest page.
    ///
    /// A failed initial page load is reported but does not fail the open.
    pub async fn open(&self, identifier: &str) -> Result<ResolvedChannel, SyncError> {
        let result = self.switch_to(identifier).await;
        let resolved = self.surface(result)?;
        if let Err(e) = self.load_initial().await {
            debug!("Initial page for {} failed: {}", resolved.channel.slug, e);
        }
        Ok(resolved)
    }

    async fn switch_to(&self, identifier: &str) -> Result<ResolvedChannel, SyncError> {
        let user = self.current_user()?;
        let resolver = ChannelResolver::new(self.store.clone(), &self.config);
        let resolved = resolver.resolve(identifier, user.id).await?;
        let channel_id = resolved.channel.id;

        let token = {
            let mut state = self.lock();
            let generation = state.reset(Some(resolved.clone()));
            ViewToken { channel_id, generation }
        };

        // Subscribe before the first page so nothing created in between is missed.
        let subscription = self.store.subscribe(channel_id);
        let feed = live::spawn_merger(subscription, Arc::downgrade(&self.state), token, self.sink.clone());
        {
            let mut state = self.lock();
            if state.is_current(token) {
                state.feed = Some(feed);
            }
        }

        info!("Opened channel {} ({}) for {}", resolved.channel.slug, channel_id, user.username);
        Ok(resolved)
    }

    /// Leaves the current channel; in-flight responses for it are discarded.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(active) = state.active.as_ref() {
            debug!("Closing channel {}", active.channel.id);
        }
        state.reset(None);
    }

    pub fn active_channel(&self) -> Option<ResolvedChannel> {
        self.lock().active.clone()
    }

    /// The window as it should be rendered, oldest first.
    pub fn snapshot(&self) -> Vec<MessageProjection> {
        self.lock().window.entries().iter().map(LocalMessage::project).collect()
    }

    pub fn message(&self, id: Uuid) -> Option<MessageProjection> {
        self.lock().window.get(id).map(LocalMessage::project)
    }

    /// Raw local entry, including the stored body of tombstones.
    pub fn local_entry(&self, id: Uuid) -> Option<LocalMessage> {
        self.lock().window.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().window.is_empty()
    }

    /// Messages in the window matching `query`; see [`search::filter`].
    pub fn search(&self, query: &str) -> Vec<MessageProjection> {
        let state = self.lock();
        search::filter(state.window.entries(), query)
            .into_iter()
            .map(LocalMessage::project)
            .collect()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ViewState> {
        lock_state(&self.state)
    }

    pub(crate) fn current_user(&self) -> Result<SessionUser, SyncError> {
        self.session.current_user().ok_or(SyncError::Auth)
    }

    /// Reports a failed operation to the error sink and hands it back.
    pub(crate) fn surface<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(e) = &result {
            self.sink.report(e.kind(), &e.to_string());
        }
        result
    }
}
