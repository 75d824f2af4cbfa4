//! Channel-message synchronization core.
//!
//! A [`ChannelView`] owns the ordered message window of the channel a client
//! is looking at. History pages, the live change feed and optimistic local
//! mutations all reach that window through the view, one critical section
//! at a time, so the window is always internally consistent even while
//! persistence calls are in flight.

pub mod config;
pub mod error;
pub mod history;
pub mod live;
pub mod mutations;
pub mod reactions;
pub mod resolver;
pub mod search;
pub mod session;
pub mod store;
pub mod view;
pub mod window;

pub use config::SyncConfig;
pub use error::{ErrorKind, ErrorSink, SyncError, TracingSink};
pub use history::LoadOutcome;
pub use reactions::ReactionOp;
pub use resolver::ChannelResolver;
pub use session::{Session, SessionHandle, SessionUser};
pub use store::{EmbeddedStore, RecordStore, StoreError};
pub use view::ChannelView;
pub use window::{Delivery, LocalMessage, MergeOutcome, MessageProjection, MessageWindow};
