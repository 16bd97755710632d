use switchyard_api::{ControlApiError, ControlApiErrorKind};
use thiserror::Error;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the HTTP control API client.
#[derive(Debug, Error)]
pub enum Error {
    /// The controller base URL cannot carry path segments.
    #[error("controller url cannot be a base: {0}")]
    BaseUrl(String),

    /// Transport level failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Response body was not the expected JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The engine answered with a non-success status.
    #[error("engine returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,

        /// Message from the engine's error body, or the raw body.
        message: String,
    },
}

impl ControlApiError for Error {
    fn kind(&self) -> ControlApiErrorKind {
        match self {
            Self::BaseUrl(_) => ControlApiErrorKind::Other,
            Self::Http(e) if e.is_timeout() => ControlApiErrorKind::Timeout,
            Self::Http(e) if e.is_decode() => ControlApiErrorKind::Decode,
            Self::Http(_) => ControlApiErrorKind::Unreachable,
            Self::Json(_) => ControlApiErrorKind::Decode,
            // The delay endpoint reports a probe that ran out of time as 408 / 504.
            Self::Status {
                status: 408 | 504, ..
            } => ControlApiErrorKind::Timeout,
            Self::Status { .. } => ControlApiErrorKind::Rejected,
        }
    }
}
