use thiserror::Error;
use tracing::warn;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not signed in")]
    Auth,

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth | Self::Forbidden(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

/// Category of a user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Validation,
    Persistence,
    /// The live feed dropped events; the view may be stale until refreshed.
    Feed,
}

/// Where user-visible failures are announced (a toast, a status line, a log).
pub trait ErrorSink: Send + Sync {
    fn report(&self, kind: ErrorKind, message: &str);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, kind: ErrorKind, message: &str) {
        warn!(?kind, "{}", message);
    }
}
