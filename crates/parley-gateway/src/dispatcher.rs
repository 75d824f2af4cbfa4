use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use parley_types::events::GatewayEvent;

const FEED_CAPACITY: usize = 1024;

/// Fans persisted changes out to every subscriber.
///
/// Cloning is cheap; all clones share one broadcast channel.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every receiver sees every event.
    broadcast_tx: broadcast::Sender<Arc<GatewayEvent>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(FEED_CAPACITY)
    }

    /// `capacity` is how many events a slow receiver may fall behind before
    /// it starts losing them.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to all events. Used by gateway connections, which filter
    /// by their own subscription set.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Subscribe to the events of a single channel.
    pub fn subscribe_channel(&self, channel_id: Uuid) -> ChannelSubscription {
        ChannelSubscription {
            channel_id,
            rx: self.subscribe(),
        }
    }

    /// Broadcast an event. Returns the number of receivers it reached.
    pub fn broadcast(&self, event: GatewayEvent) -> usize {
        self.inner.broadcast_tx.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

/// What a channel subscription yields.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Event(GatewayEvent),
    /// The subscriber fell behind and `n` events were dropped.
    Lagged(u64),
}

/// A change feed scoped to one channel. Dropping it unsubscribes.
pub struct ChannelSubscription {
    channel_id: Uuid,
    rx: broadcast::Receiver<Arc<GatewayEvent>>,
}

impl ChannelSubscription {
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Next event for this channel, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<FeedItem> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.channel_id() == Some(self.channel_id) {
                        return Some(FeedItem::Event(event.as_ref().clone()));
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Channel {} feed lagged by {} events", self.channel_id, n);
                    return Some(FeedItem::Lagged(n));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
