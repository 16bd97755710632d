//! Periodic latency probing through the engine.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use switchyard_api::{ControlApi, ControlApiError, ControlApiErrorKind, DelayProbe};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{Delay, LatencyCache};

/// Default interval between probe rounds
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(600);

/// Default upper bound for a single probe
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of probes in flight at once
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 8;

/// Default URL fetched through each proxy
const DEFAULT_PROBE_URL: &str = "http://www.gstatic.com/generate_204";

/// Shortest interval the loop runs at; `tokio::time::interval` rejects zero
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the latency prober
#[derive(Clone, Debug)]
pub struct LatencyProberConfig {
    /// Interval between probe rounds
    pub interval: Duration,

    /// URL fetched through each proxy, and the timeout for doing so
    pub probe: DelayProbe,

    /// Number of probes in flight at once
    pub max_concurrent_probes: usize,
}

impl Default for LatencyProberConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROBE_INTERVAL,
            probe: DelayProbe {
                // Constant input, parsing cannot fail.
                url: Url::parse(DEFAULT_PROBE_URL).expect("default probe url is valid"),
                timeout: DEFAULT_PROBE_TIMEOUT,
            },
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }
}

/// Measures the members of every proxy group on a fixed cadence and writes the results
/// into a [`LatencyCache`].
pub struct LatencyProber<A>
where
    A: ControlApi,
{
    api: A,
    cache: LatencyCache,
    config: LatencyProberConfig,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<A> LatencyProber<A>
where
    A: ControlApi,
{
    /// Creates a prober writing into `cache`.
    pub fn new(api: A, cache: LatencyCache, config: LatencyProberConfig) -> Self {
        Self {
            api,
            cache,
            config,
            shutdown: CancellationToken::new(),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs a single probe round.
    ///
    /// Returns the number of proxies probed.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology could not be fetched. Failures of individual
    /// probes are recorded as [`Delay::Unmeasured`] instead.
    pub async fn probe_once(&self) -> Result<usize, A::Error> {
        probe_round(&self.api, &self.cache, &self.config).await
    }

    /// Starts the background probe loop. Calling it twice has no effect.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        info!(
            "Starting latency prober with interval {:?}",
            self.config.interval
        );

        let api = self.api.clone();
        let cache = self.cache.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval.max(MIN_PROBE_INTERVAL));

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Latency prober received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = probe_round(&api, &cache, &config).await {
                            warn!("Latency probe round failed: {}", e);
                        }
                    }
                }
            }
        }));
    }

    /// Stops the background probe loop and waits for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(task) = self.task.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Latency prober task completed"),
                Ok(Err(e)) => warn!("Latency prober task failed: {}", e),
                Err(_) => warn!("Latency prober task timed out"),
            }
        }
    }
}

async fn probe_round<A: ControlApi>(
    api: &A,
    cache: &LatencyCache,
    config: &LatencyProberConfig,
) -> Result<usize, A::Error> {
    let records = api.fetch_groups().await?;

    let proxies: BTreeSet<String> = records
        .values()
        .flat_map(|record| record.all.iter().cloned())
        .collect();

    debug!("Probing {} proxies", proxies.len());

    let probed = proxies.len();
    futures::stream::iter(proxies)
        .map(|proxy| async move {
            let result = api.measure_delay(&proxy, &config.probe).await;
            (proxy, result)
        })
        .buffer_unordered(config.max_concurrent_probes.max(1))
        .for_each(|(proxy, result)| async move {
            match result {
                Ok(delay) => cache.record(proxy, Delay::Measured(delay)),
                // Engine down: keep the last known figure rather than blanking it.
                Err(e) if e.kind() == ControlApiErrorKind::Unreachable => {
                    debug!("Skipping sample for {}: {}", proxy, e);
                }
                Err(e) => {
                    debug!("Probe of {} failed: {}", proxy, e);
                    cache.record(proxy, Delay::Unmeasured);
                }
            }
        })
        .await;

    Ok(probed)
}
