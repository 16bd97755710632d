use thiserror::Error;

use crate::OverrideStoreError;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Stored overrides are not valid JSON.
    #[error("deserialization error: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Overrides could not be encoded.
    #[error("serialization error: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl OverrideStoreError for Error {}
