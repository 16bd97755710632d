//! Mock implementation of the control API, for tests and for running without an engine.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchyard_api::{ControlApi, DelayProbe, GroupRecord, ProxiesResponse, RoutingMode};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

/// A selection request parked by [`MockControlApi::hold_selections`].
///
/// The caller of `set_group_selection` stays suspended until this is answered. Dropping it
/// answers with [`Error::Unreachable`].
#[derive(Debug)]
pub struct HeldSelection {
    /// Group the request targets.
    pub group: String,

    /// Proxy the request asks for.
    pub proxy: String,

    responder: oneshot::Sender<Result<(), Error>>,
}

impl HeldSelection {
    /// Lets the request through. The mock applies it as if it had not been held.
    pub fn accept(self) {
        let _ = self.responder.send(Ok(()));
    }

    /// Fails the request with a rejection.
    pub fn reject(self, message: impl Into<String>) {
        let _ = self.responder.send(Err(Error::Rejected(message.into())));
    }

    /// Fails the request with a timeout.
    pub fn time_out(self) {
        let _ = self
            .responder
            .send(Err(Error::Timeout(format!("{}/{}", self.group, self.proxy))));
    }
}

#[derive(Debug, Default)]
struct MockState {
    records: HashMap<String, GroupRecord>,
    mode: RoutingMode,
    selection_calls: Vec<(String, String)>,
    rejecting_groups: HashSet<String>,
    fetch_failure: Option<String>,
    held: Option<mpsc::UnboundedSender<HeldSelection>>,
    delays: HashMap<String, Option<Duration>>,
}

/// In-memory engine. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MockControlApi {
    state: Arc<Mutex<MockState>>,
}

impl MockControlApi {
    /// Creates a mock engine with the given records and mode.
    pub fn new(records: impl IntoIterator<Item = GroupRecord>, mode: RoutingMode) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        Self {
            state: Arc::new(Mutex::new(MockState {
                records,
                mode,
                ..MockState::default()
            })),
        }
    }

    /// Creates a mock engine from a `GET /proxies` response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a valid proxies document.
    pub fn from_proxies_json(json: &str, mode: RoutingMode) -> Result<Self, Error> {
        let body: ProxiesResponse = serde_json::from_str(json)
            .map_err(|e| Error::ProxiesFile(format!("Failed to parse proxies document: {e}")))?;

        Ok(Self::new(body.into_records().into_values(), mode))
    }

    /// Creates a mock engine from a file holding a `GET /proxies` response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a proxies document.
    pub fn from_proxies_file<P: AsRef<Path>>(path: P, mode: RoutingMode) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ProxiesFile(format!("Failed to read proxies file: {e}")))?;

        Self::from_proxies_json(&content, mode)
    }

    /// Inserts or replaces a record.
    pub async fn set_record(&self, record: GroupRecord) {
        self.state
            .lock()
            .await
            .records
            .insert(record.name.clone(), record);
    }

    /// Returns a copy of a record.
    pub async fn record(&self, name: &str) -> Option<GroupRecord> {
        self.state.lock().await.records.get(name).cloned()
    }

    /// Makes every topology fetch fail until cleared with `None`.
    pub async fn fail_fetches(&self, reason: Option<&str>) {
        self.state.lock().await.fetch_failure = reason.map(ToString::to_string);
    }

    /// Makes every selection on `group` fail with a rejection.
    pub async fn reject_selections_for(&self, group: &str) {
        self.state
            .lock()
            .await
            .rejecting_groups
            .insert(group.to_string());
    }

    /// Parks every following selection until the returned receiver's items are answered.
    pub async fn hold_selections(&self) -> mpsc::UnboundedReceiver<HeldSelection> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.held = Some(tx);
        rx
    }

    /// Every `(group, proxy)` selection received so far, in arrival order.
    pub async fn selection_calls(&self) -> Vec<(String, String)> {
        self.state.lock().await.selection_calls.clone()
    }

    /// Sets the delay reported for `proxy`. `None` makes probes of it time out.
    pub async fn set_delay(&self, proxy: &str, delay: Option<Duration>) {
        self.state
            .lock()
            .await
            .delays
            .insert(proxy.to_string(), delay);
    }

    fn apply_selection(state: &mut MockState, group: &str, proxy: &str) -> Result<(), Error> {
        if state.rejecting_groups.contains(group) {
            return Err(Error::Rejected(format!("selection on {group} is scripted to fail")));
        }

        let record = state
            .records
            .get_mut(group)
            .ok_or_else(|| Error::Rejected(format!("group {group} not found")))?;

        if !record.all.iter().any(|member| member == proxy) {
            return Err(Error::Rejected(format!("proxy {proxy} not in group {group}")));
        }

        record.now = proxy.to_string();
        Ok(())
    }
}

#[async_trait]
impl ControlApi for MockControlApi {
    type Error = Error;

    async fn fetch_groups(&self) -> Result<HashMap<String, GroupRecord>, Self::Error> {
        let state = self.state.lock().await;

        if let Some(reason) = &state.fetch_failure {
            return Err(Error::Unreachable(reason.clone()));
        }

        Ok(state.records.clone())
    }

    async fn set_group_selection(&self, group: &str, proxy: &str) -> Result<(), Self::Error> {
        let held = {
            let mut state = self.state.lock().await;
            state
                .selection_calls
                .push((group.to_string(), proxy.to_string()));
            state.held.clone()
        };

        if let Some(held) = held {
            let (responder, response) = oneshot::channel();
            let parked = HeldSelection {
                group: group.to_string(),
                proxy: proxy.to_string(),
                responder,
            };

            if held.send(parked).is_ok() {
                debug!("holding selection {group}/{proxy}");
                response
                    .await
                    .map_err(|_| Error::Unreachable("held selection dropped".to_string()))??;
            }
        }

        let mut state = self.state.lock().await;
        Self::apply_selection(&mut state, group, proxy)
    }

    async fn fetch_mode(&self) -> Result<RoutingMode, Self::Error> {
        Ok(self.state.lock().await.mode)
    }

    async fn set_mode(&self, mode: RoutingMode) -> Result<(), Self::Error> {
        self.state.lock().await.mode = mode;
        Ok(())
    }

    async fn measure_delay(
        &self,
        proxy: &str,
        probe: &DelayProbe,
    ) -> Result<Duration, Self::Error> {
        let state = self.state.lock().await;

        match state.delays.get(proxy) {
            Some(Some(delay)) if *delay <= probe.timeout => Ok(*delay),
            Some(_) => Err(Error::Timeout(format!("probe of {proxy}"))),
            None => Err(Error::Rejected(format!("proxy {proxy} not found"))),
        }
    }
}
