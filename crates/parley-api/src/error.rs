use axum::http::StatusCode;
use tracing::{error, warn};

use parley_sync::{StoreError, SyncError};

/// Maps a core error onto the status a client should see.
pub fn sync_status(e: SyncError) -> StatusCode {
    match e {
        SyncError::Auth => StatusCode::UNAUTHORIZED,
        SyncError::Forbidden(reason) => {
            warn!("Forbidden: {}", reason);
            StatusCode::FORBIDDEN
        }
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Validation(reason) => {
            warn!("Rejected request: {}", reason);
            StatusCode::BAD_REQUEST
        }
        SyncError::Persistence(e) => store_status(e),
    }
}

pub fn store_status(e: StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(reason) => {
            warn!("Conflicting write: {}", reason);
            StatusCode::CONFLICT
        }
        other => {
            error!("Store error: {}", other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
