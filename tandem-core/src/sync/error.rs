use std::time::Duration;

use thiserror::Error;

use crate::clock::ClockError;
use crate::store::StoreError;

/// Errors raised while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("Sync session timed out after {elapsed:?} (maximum {max:?})")]
    Timeout { elapsed: Duration, max: Duration },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Another sync session is already running")]
    LockHeld,

    #[error("Escalated: {0}")]
    Escalated(String),
}

impl SyncError {
    /// Programmer or configuration errors. These are never converted into
    /// deferred changes or failed sessions.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownProvider(_)
                | SyncError::Clock(_)
                | SyncError::Store(StoreError::QueriesUnsupported)
        )
    }
}
