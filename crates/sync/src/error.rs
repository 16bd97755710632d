//! Error types for synchronization

use std::time::Duration;

use switchyard_api::ControlApiErrorKind;
use thiserror::Error;

/// Synchronization errors. None of them are fatal: the last good tree stays available.
#[derive(Clone, Debug, Error)]
pub enum SyncError {
    /// The topology could not be fetched
    #[error("topology fetch failed ({kind}): {message}")]
    Fetch {
        /// What went wrong talking to the engine
        kind: ControlApiErrorKind,

        /// Description from the control API client
        message: String,
    },

    /// The engine did not answer within the configured request timeout
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    /// Reading or switching the engine's routing mode failed
    #[error("routing mode request failed ({kind}): {message}")]
    Mode {
        /// What went wrong talking to the engine
        kind: ControlApiErrorKind,

        /// Description from the control API client
        message: String,
    },

    /// The override store failed
    #[error("override store error: {0}")]
    Persistence(String),
}
