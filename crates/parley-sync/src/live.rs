//! Merges the channel change feed into the view's window.

use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use parley_gateway::dispatcher::{ChannelSubscription, FeedItem};
use parley_types::events::GatewayEvent;

use crate::error::{ErrorKind, ErrorSink};
use crate::view::{ViewState, ViewToken, lock_state};
use crate::window::MergeOutcome;

/// The running merge task of one channel subscription. Dropping it (or
/// calling [`FeedHandle::unsubscribe`]) stops the task and releases the
/// subscription.
pub struct FeedHandle {
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Applies one feed event if it still belongs to the view identified by
/// `token`. Returns `None` when the view has moved on.
pub(crate) fn apply_feed_event(state: &mut ViewState, token: ViewToken, event: GatewayEvent) -> Option<MergeOutcome> {
    if !state.is_current(token) {
        return None;
    }
    if event.channel_id() != Some(token.channel_id) {
        return Some(MergeOutcome::Ignored);
    }
    Some(state.window.merge_event(event))
}

/// Spawns the task feeding `subscription` into the view. The task holds the
/// state weakly and ends once the view is gone or no longer on `token`.
pub(crate) fn spawn_merger(
    mut subscription: ChannelSubscription,
    state: Weak<Mutex<ViewState>>,
    token: ViewToken,
    sink: Arc<dyn ErrorSink>,
) -> FeedHandle {
    let task = tokio::spawn(async move {
        while let Some(item) = subscription.recv().await {
            let Some(state) = state.upgrade() else {
                break;
            };
            match item {
                FeedItem::Event(event) => {
                    let id = event.message().map(|m| m.id);
                    let outcome = {
                        let mut state = lock_state(&state);
                        apply_feed_event(&mut state, token, event)
                    };
                    match outcome {
                        Some(outcome) => trace!("Feed event for {:?}: {:?}", id, outcome),
                        None => {
                            debug!("Discarding feed event for {:?}: view left channel {}", id, token.channel_id);
                            break;
                        }
                    }
                }
                FeedItem::Lagged(n) => {
                    sink.report(
                        ErrorKind::Feed,
                        &format!("live updates fell behind; {} events were missed", n),
                    );
                }
            }
        }
        debug!("Feed merger for channel {} stopped", subscription.channel_id());
    });
    FeedHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_types::models::{Channel, ChannelKind, Message, MessageMetadata, ResolvedChannel};
    use uuid::Uuid;

    fn channel(id: Uuid) -> ResolvedChannel {
        let now = Utc::now();
        ResolvedChannel {
            channel: Channel {
                id,
                slug: "general".into(),
                name: "general".into(),
                kind: ChannelKind::Text,
                is_private: false,
                is_direct: false,
                created_by: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                archived_at: None,
            },
            member_count: 1,
        }
    }

    fn message(channel_id: Uuid) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            channel_id,
            author_id: Uuid::new_v4(),
            author_username: "ada".into(),
            author_display_name: None,
            body: "hi".into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            nonce: None,
            metadata: MessageMetadata::default(),
        }
    }

    fn state_on(channel_id: Uuid) -> (ViewState, ViewToken) {
        let state = ViewState {
            generation: 3,
            active: Some(channel(channel_id)),
            ..Default::default()
        };
        let token = ViewToken {
            channel_id,
            generation: 3,
        };
        (state, token)
    }

    #[test]
    fn event_for_old_generation_is_discarded() {
        let cid = Uuid::new_v4();
        let (mut state, token) = state_on(cid);
        state.generation += 1;

        let outcome = apply_feed_event(&mut state, token, GatewayEvent::MessageCreate { message: message(cid) });
        assert_eq!(outcome, None);
        assert!(state.window.is_empty());
    }

    #[test]
    fn event_for_other_channel_is_ignored() {
        let cid = Uuid::new_v4();
        let (mut state, token) = state_on(cid);

        let outcome = apply_feed_event(
            &mut state,
            token,
            GatewayEvent::MessageCreate {
                message: message(Uuid::new_v4()),
            },
        );
        assert_eq!(outcome, Some(MergeOutcome::Ignored));
        assert!(state.window.is_empty());
    }

    #[test]
    fn repeated_create_is_merged_once() {
        let cid = Uuid::new_v4();
        let (mut state, token) = state_on(cid);
        let m = message(cid);

        let first = apply_feed_event(&mut state, token, GatewayEvent::MessageCreate { message: m.clone() });
        let second = apply_feed_event(&mut state, token, GatewayEvent::MessageCreate { message: m });
        assert_eq!(first, Some(MergeOutcome::Inserted));
        assert_eq!(second, Some(MergeOutcome::Duplicate));
        assert_eq!(state.window.len(), 1);
    }
}
