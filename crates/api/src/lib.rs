//! Abstract interface for talking to the control API of a Clash-style proxy routing engine.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod mode;
mod record;

pub use mode::{ModeParseError, RoutingMode};
pub use record::{GroupRecord, ProxiesResponse};

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

/// The kind of control API error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlApiErrorKind {
    /// The engine could not be reached (connection refused, DNS, TLS...).
    Unreachable,

    /// The engine did not answer in time.
    Timeout,

    /// The engine answered but refused the request.
    Rejected,

    /// The engine answered with a body that could not be decoded.
    Decode,

    /// Other/unknown error
    Other,
}

impl Display for ControlApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `ControlApi` errors
pub trait ControlApiError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> ControlApiErrorKind;
}

/// Parameters of a single latency measurement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DelayProbe {
    /// URL the engine fetches through the proxy.
    pub url: Url,

    /// Upper bound the engine waits before reporting the proxy as timed out.
    pub timeout: Duration,
}

/// Abstract interface to the routing engine's control API.
///
/// Implementations are cheap to clone and shared between the synchronizer, the selection
/// mutator and the latency prober.
#[async_trait]
pub trait ControlApi
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for this API.
    type Error: ControlApiError;

    /// Get every proxy and proxy group known to the engine, keyed by name.
    async fn fetch_groups(&self) -> Result<HashMap<String, GroupRecord>, Self::Error>;

    /// Ask the engine to route `group` through `proxy`.
    async fn set_group_selection(&self, group: &str, proxy: &str) -> Result<(), Self::Error>;

    /// Get the engine's active routing mode.
    async fn fetch_mode(&self) -> Result<RoutingMode, Self::Error>;

    /// Switch the engine's routing mode.
    async fn set_mode(&self, mode: RoutingMode) -> Result<(), Self::Error>;

    /// Measure the delay of a single proxy.
    async fn measure_delay(&self, proxy: &str, probe: &DelayProbe)
    -> Result<Duration, Self::Error>;
}
