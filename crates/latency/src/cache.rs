//! Process-wide latency store.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;

/// Outcome of the latest probe of a proxy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delay {
    /// Round trip through the proxy.
    Measured(Duration),

    /// The probe ran but produced no figure (timeout, proxy failure).
    Unmeasured,
}

/// Latest delay of a proxy plus when it was recorded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LatencySample {
    /// The measured delay.
    pub delay: Delay,

    /// When the sample was written.
    pub recorded_at: SystemTime,
}

/// Keyed by proxy name. Clones share the same map.
///
/// Readers get whole samples copied out of the map, never a half-written one, and never
/// wait on a probe in flight.
#[derive(Clone, Debug, Default)]
pub struct LatencyCache {
    samples: Arc<DashMap<String, LatencySample>>,
}

impl LatencyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest sample for `proxy`, if it was ever probed.
    #[must_use]
    pub fn get(&self, proxy: &str) -> Option<LatencySample> {
        self.samples.get(proxy).map(|entry| *entry.value())
    }

    /// Records a new sample for `proxy`, replacing the previous one.
    pub fn record(&self, proxy: impl Into<String>, delay: Delay) {
        self.samples.insert(
            proxy.into(),
            LatencySample {
                delay,
                recorded_at: SystemTime::now(),
            },
        );
    }

    /// Number of proxies with a sample.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no proxy has a sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
