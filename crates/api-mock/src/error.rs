//! Error types for the mock control API.

use switchyard_api::{ControlApiError, ControlApiErrorKind};
use thiserror::Error;

/// Error type for the mock control API.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The mock was told to behave as if the engine were down.
    #[error("Mock engine unreachable: {0}")]
    Unreachable(String),

    /// The request named something the engine does not know, or a failure was scripted.
    #[error("Mock engine rejected request: {0}")]
    Rejected(String),

    /// A held request was answered with a timeout, or a probe was scripted to time out.
    #[error("Mock engine timed out: {0}")]
    Timeout(String),

    /// Error when loading or parsing a proxies file.
    #[error("Proxies file error: {0}")]
    ProxiesFile(String),
}

impl ControlApiError for Error {
    fn kind(&self) -> ControlApiErrorKind {
        match self {
            Self::Unreachable(_) => ControlApiErrorKind::Unreachable,
            Self::Rejected(_) => ControlApiErrorKind::Rejected,
            Self::Timeout(_) => ControlApiErrorKind::Timeout,
            Self::ProxiesFile(_) => ControlApiErrorKind::Other,
        }
    }
}
