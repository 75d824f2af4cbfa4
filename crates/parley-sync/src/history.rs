//! Backward, cursor-paginated history loading.
//!
//! Pages are requested newest first and reversed before they reach the
//! window. A page ends strictly before the `(created_at, id)` of the oldest
//! confirmed message, so rows sharing a timestamp are never skipped or
//! repeated.

use tracing::{debug, warn};

use parley_types::models::{Message, PageCursor};

use crate::error::SyncError;
use crate::store::RecordStore;
use crate::view::{ChannelView, ViewToken};

/// Paging state of the active channel.
#[derive(Debug, Clone)]
pub(crate) struct HistoryState {
    pub loading: bool,
    pub has_more: bool,
}

impl Default for HistoryState {
    fn default() -> Self {
        Self {
            loading: false,
            has_more: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { added: usize, has_more: bool },
    /// Another load was in flight, or there is nothing older to fetch.
    Skipped,
    /// The view moved on while the page was in flight; it was dropped.
    Stale,
}

enum PageKind {
    Initial,
    Older(PageCursor),
}

impl<S: RecordStore> ChannelView<S> {
    /// Loads the newest page of the active channel.
    pub async fn load_initial(&self) -> Result<LoadOutcome, SyncError> {
        let result = self.load_initial_inner().await;
        self.surface(result)
    }

    /// Loads the page just older than the oldest loaded message.
    pub async fn load_more(&self) -> Result<LoadOutcome, SyncError> {
        let result = self.load_more_inner().await;
        self.surface(result)
    }

    /// Whether older history may still exist. An approximation: a full page
    /// counts as "more".
    pub fn has_more(&self) -> bool {
        self.lock().history.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.lock().history.loading
    }

    async fn load_initial_inner(&self) -> Result<LoadOutcome, SyncError> {
        let token = {
            let mut state = self.lock();
            let token = state.require_token()?;
            if state.history.loading {
                return Ok(LoadOutcome::Skipped);
            }
            state.history.loading = true;
            token
        };
        self.fetch(token, PageKind::Initial).await
    }

    async fn load_more_inner(&self) -> Result<LoadOutcome, SyncError> {
        let (token, cursor) = {
            let mut state = self.lock();
            let token = state.require_token()?;
            if state.history.loading || !state.history.has_more {
                return Ok(LoadOutcome::Skipped);
            }
            let Some(cursor) = state.window.oldest_cursor() else {
                return Ok(LoadOutcome::Skipped);
            };
            state.history.loading = true;
            (token, cursor)
        };
        self.fetch(token, PageKind::Older(cursor)).await
    }

    async fn fetch(&self, token: ViewToken, kind: PageKind) -> Result<LoadOutcome, SyncError> {
        let limit = self.config.page_limit();
        let before = match &kind {
            PageKind::Initial => None,
            PageKind::Older(cursor) => Some(*cursor),
        };
        let result = self.store.messages_page(token.channel_id, before, limit).await;

        let mut state = self.lock();
        if !state.is_current(token) {
            debug!("Dropping page for channel {} from a previous view", token.channel_id);
            return Ok(LoadOutcome::Stale);
        }
        state.history.loading = false;

        let mut page: Vec<Message> = match result {
            Ok(page) => page,
            Err(e) => {
                warn!("History page for {} failed: {}", token.channel_id, e);
                return Err(e.into());
            }
        };
        let has_more = page.len() as u32 >= limit;
        page.reverse();

        let added = match kind {
            PageKind::Initial => state.window.seed(page),
            PageKind::Older(_) => state.window.prepend(page),
        };
        state.history.has_more = has_more;
        debug!("Loaded {} messages for {} (has_more={})", added, token.channel_id, has_more);
        Ok(LoadOutcome::Loaded { added, has_more })
    }
}
