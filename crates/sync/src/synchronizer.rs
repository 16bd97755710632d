//! Keeps the selection tree in step with the engine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use switchyard_api::{ControlApi, ControlApiError, RoutingMode};
use switchyard_latency::LatencyCache;
use switchyard_overrides::{OverrideStore, SelectedProxyOverrides};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::{BuildOutput, SelectionRequest, build};
use crate::error::SyncError;
use crate::mode::ModeGate;
use crate::mutator::{Rejection, SelectionMutator, SelectionOutcome, SelectionState};
use crate::snapshot::TopologySnapshot;
use crate::tree::{GroupEntryKind, SelectionTree};

/// Default upper bound for a single engine request
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest refresh period [`Synchronizer::run`] accepts; `tokio::time::interval` rejects zero
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the synchronizer
#[derive(Clone, Debug)]
pub struct SynchronizerConfig {
    /// Upper bound for a topology fetch or selection round trip
    pub request_timeout: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// What the presentation layer gets from [`Synchronizer::render_tree`].
#[derive(Clone, Debug)]
pub struct RenderedTree {
    /// Last successfully built tree, with confirmed selections applied.
    pub tree: Arc<SelectionTree>,

    /// The tree should be rebuilt before it is trusted: the last fetch failed, the routing
    /// mode changed, or a selection landed while a rebuild was in flight.
    pub stale: bool,
}

/// A self-heal selection spawned by [`Synchronizer::refresh`].
#[derive(Debug)]
pub struct SelfHeal {
    /// The default being pushed to the engine.
    pub request: SelectionRequest,

    handle: JoinHandle<SelectionOutcome>,
}

impl SelfHeal {
    /// Waits for the selection to settle.
    pub async fn outcome(self) -> SelectionOutcome {
        self.handle.await.unwrap_or_else(|e| {
            SelectionOutcome::Rejected(Rejection::Interrupted(e.to_string()))
        })
    }
}

/// Result of [`Synchronizer::refresh`].
#[derive(Debug)]
pub struct RefreshReport {
    /// The freshly built tree.
    pub tree: Arc<SelectionTree>,

    /// Self-heal selections already running in the background.
    pub self_heal: Vec<SelfHeal>,
}

impl RefreshReport {
    /// Waits for every self-heal selection to settle.
    pub async fn settle(self) -> Vec<(SelectionRequest, SelectionOutcome)> {
        let mut settled = Vec::with_capacity(self.self_heal.len());
        for heal in self.self_heal {
            let request = heal.request.clone();
            settled.push((request, heal.outcome().await));
        }
        settled
    }
}

struct TreeSlot {
    tree: Arc<SelectionTree>,
    snapshot: Option<Arc<TopologySnapshot>>,
    stale: bool,
    /// Bumped on every commit, lets a rebuild notice it raced one.
    commits: u64,
    /// Per group, the number and proxy of its latest commit.
    last_commit: HashMap<String, (u64, String)>,
}

struct Inner<A, S> {
    api: A,
    store: S,
    mode: ModeGate,
    latency: LatencyCache,
    mutator: SelectionMutator,
    slot: RwLock<TreeSlot>,
    overrides: RwLock<SelectedProxyOverrides>,
    /// Serializes writes to the override store so the last save holds the newest map.
    persist: tokio::sync::Mutex<()>,
    config: SynchronizerConfig,
}

/// Owns the selection tree, the override map, and the selection state machine.
///
/// Cheap to clone; clones share all state.
pub struct Synchronizer<A, S>
where
    A: ControlApi,
    S: OverrideStore,
{
    inner: Arc<Inner<A, S>>,
}

impl<A, S> Clone for Synchronizer<A, S>
where
    A: ControlApi,
    S: OverrideStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, S> Synchronizer<A, S>
where
    A: ControlApi,
    S: OverrideStore,
{
    /// Creates a synchronizer, loading the saved overrides from `store`.
    ///
    /// The tree starts empty and stale until the first [`Synchronizer::refresh`].
    ///
    /// # Errors
    ///
    /// Returns an error if the saved overrides cannot be loaded.
    pub async fn new(
        api: A,
        store: S,
        mode: ModeGate,
        latency: LatencyCache,
        config: SynchronizerConfig,
    ) -> Result<Self, SyncError> {
        let overrides = store
            .load()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;

        info!(
            "Creating synchronizer in {} mode with {} saved overrides",
            mode.get(),
            overrides.len()
        );

        let initial = TreeSlot {
            tree: Arc::new(SelectionTree::empty(mode.get())),
            snapshot: None,
            stale: true,
            commits: 0,
            last_commit: HashMap::new(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                api,
                store,
                mode,
                latency,
                mutator: SelectionMutator::new(),
                slot: RwLock::new(initial),
                overrides: RwLock::new(overrides),
                persist: tokio::sync::Mutex::new(()),
                config,
            }),
        })
    }

    /// The routing mode gate.
    #[must_use]
    pub fn mode(&self) -> &ModeGate {
        &self.inner.mode
    }

    /// The last successfully built tree. Never blocks on the network.
    #[must_use]
    pub fn render_tree(&self) -> RenderedTree {
        let slot = self.inner.slot.read();

        RenderedTree {
            tree: slot.tree.clone(),
            stale: slot.stale || slot.tree.mode() != self.inner.mode.get(),
        }
    }

    /// The snapshot the current tree was built from, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<TopologySnapshot>> {
        self.inner.slot.read().snapshot.clone()
    }

    /// The remembered user choices.
    #[must_use]
    pub fn overrides(&self) -> SelectedProxyOverrides {
        self.inner.overrides.read().clone()
    }

    /// Where `group` stands in the selection state machine.
    #[must_use]
    pub fn selection_state(&self, group: &str) -> SelectionState {
        self.inner.mutator.state(group)
    }

    /// Fetches the topology and rebuilds the tree.
    ///
    /// In direct mode nothing is fetched and the tree becomes empty. Groups without a valid
    /// selection get their first member selected locally and a selection is started in the
    /// background to make the engine agree.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology could not be fetched. The previous tree is kept and
    /// marked stale.
    pub async fn refresh(&self) -> Result<RefreshReport, SyncError> {
        let mode = self.inner.mode.get();

        if mode == RoutingMode::Direct {
            debug!("Direct mode, clearing selection tree");
            let tree = Arc::new(SelectionTree::empty(mode));
            {
                let mut slot = self.inner.slot.write();
                slot.tree = tree.clone();
                slot.snapshot = None;
                slot.stale = false;
            }
            return Ok(RefreshReport {
                tree,
                self_heal: Vec::new(),
            });
        }

        let commits_before = self.inner.slot.read().commits;

        let records = match tokio::time::timeout(
            self.inner.config.request_timeout,
            self.inner.api.fetch_groups(),
        )
        .await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!("Topology fetch failed, keeping previous tree: {}", e);
                self.inner.slot.write().stale = true;
                return Err(SyncError::Fetch {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!("Topology fetch timed out, keeping previous tree");
                self.inner.slot.write().stale = true;
                return Err(SyncError::Timeout(self.inner.config.request_timeout));
            }
        };

        let snapshot = Arc::new(TopologySnapshot::from_map(records));
        let BuildOutput {
            mut tree,
            mut self_heal,
        } = build(&snapshot, mode, &self.inner.latency);

        info!(
            "Built selection tree with {} groups from {} records fetched at {:?}",
            tree.len(),
            snapshot.len(),
            snapshot.fetched_at()
        );

        let tree = {
            let mut slot = self.inner.slot.write();
            let mut stale = false;

            // Commits confirmed after the fetch started may be missing from the snapshot.
            for (group, (number, proxy)) in &slot.last_commit {
                if *number <= commits_before {
                    continue;
                }

                debug!("Re-applying {}/{} committed during rebuild", group, proxy);
                self_heal.retain(|request| request.group != *group);
                match tree.with_selection(group, proxy) {
                    Some(updated) => tree = updated,
                    None => stale = true,
                }
            }

            let tree = Arc::new(tree);
            slot.tree = tree.clone();
            slot.snapshot = Some(snapshot);
            slot.stale = stale;
            tree
        };

        let self_heal = self_heal
            .into_iter()
            .map(|request| {
                let this = self.clone();
                let SelectionRequest { group, proxy } = request.clone();
                let handle = tokio::spawn(async move { this.select(&group, &proxy, false).await });
                SelfHeal { request, handle }
            })
            .collect();

        Ok(RefreshReport { tree, self_heal })
    }

    /// Asks the engine to route `group` through `proxy`.
    ///
    /// On confirmation the held tree shows `proxy` as the only selected member of `group`
    /// and the override map remembers it, then the map is saved. On anything else nothing
    /// changes.
    pub async fn request_select(&self, group: &str, proxy: &str) -> SelectionOutcome {
        info!("Requesting selection {}/{}", group, proxy);
        self.select(group, proxy, true).await
    }

    /// Drives one selection. Self-heal defaults pass `remember = false`: they are not user
    /// choices and must not shadow one in the override map.
    async fn select(&self, group: &str, proxy: &str, remember: bool) -> SelectionOutcome {
        let outcome = self
            .inner
            .mutator
            .select(
                &self.inner.api,
                group,
                proxy,
                self.inner.config.request_timeout,
                |group, proxy| self.apply_commit(group, proxy, remember),
            )
            .await;

        if outcome.is_committed() && remember {
            self.persist_overrides().await;
        }

        outcome
    }

    /// Re-applies saved overrides the engine does not currently reflect.
    ///
    /// Only visible selector groups are considered, and only when the saved proxy is still
    /// one of the group's members.
    pub async fn restore_overrides(&self) -> Vec<(SelectionRequest, SelectionOutcome)> {
        let tree = self.render_tree().tree;
        let overrides = self.overrides();

        let requests: Vec<SelectionRequest> = tree
            .groups()
            .iter()
            .filter_map(|group| {
                let saved = overrides.get(&group.name)?;
                let GroupEntryKind::Selector { members } = &group.kind else {
                    return None;
                };

                let is_member = members.iter().any(|member| member.name == saved);
                if !is_member || group.selected() == Some(saved) {
                    return None;
                }

                Some(SelectionRequest::new(&group.name, saved))
            })
            .collect();

        let mut restored = Vec::with_capacity(requests.len());
        for request in requests {
            info!(
                "Restoring saved selection {}/{}",
                request.group, request.proxy
            );
            let outcome = self.request_select(&request.group, &request.proxy).await;
            restored.push((request, outcome));
        }
        restored
    }

    /// Reads the engine's routing mode into the mode gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine could not be asked.
    pub async fn sync_mode(&self) -> Result<RoutingMode, SyncError> {
        let mode = self.with_timeout(self.inner.api.fetch_mode()).await?;
        self.inner.mode.set(mode);
        Ok(mode)
    }

    /// Switches the engine's routing mode, then the mode gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine did not accept the change; the gate is left alone.
    pub async fn change_mode(&self, mode: RoutingMode) -> Result<(), SyncError> {
        self.with_timeout(self.inner.api.set_mode(mode)).await?;
        self.inner.mode.set(mode);
        Ok(())
    }

    /// Keeps the tree in step with the engine until `shutdown` is cancelled.
    ///
    /// Every `refresh_interval` the engine's mode is read back and the tree rebuilt; a mode
    /// change rebuilds at once. Saved overrides are restored after the first successful
    /// rebuild and again after every mode change.
    pub async fn run(&self, refresh_interval: Duration, shutdown: CancellationToken) {
        let mut modes = self.inner.mode.subscribe();
        let mut interval = tokio::time::interval(refresh_interval.max(MIN_REFRESH_INTERVAL));
        let mut restore_pending = true;

        info!(
            "Starting synchronizer loop with interval {:?}",
            refresh_interval
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Synchronizer loop received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sync_mode().await {
                        warn!("Failed to read routing mode: {}", e);
                    }
                }
                changed = modes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    info!("Routing mode changed, rebuilding");
                    restore_pending = true;
                }
            }

            match self.refresh().await {
                Ok(report) => {
                    report.settle().await;

                    if restore_pending {
                        restore_pending = false;
                        for (request, outcome) in self.restore_overrides().await {
                            if let SelectionOutcome::Rejected(rejection) = outcome {
                                warn!(
                                    "Could not restore {}/{}: {}",
                                    request.group, request.proxy, rejection
                                );
                            }
                        }
                    }
                }
                Err(e) => warn!("Refresh failed: {}", e),
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        request: impl Future<Output = Result<T, A::Error>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.inner.config.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SyncError::Mode {
                kind: e.kind(),
                message: e.to_string(),
            }),
            Err(_) => Err(SyncError::Timeout(self.inner.config.request_timeout)),
        }
    }

    /// Runs under the mutator lock: tree first, then the in-memory override map.
    fn apply_commit(&self, group: &str, proxy: &str, remember: bool) {
        {
            let mut slot = self.inner.slot.write();
            slot.commits += 1;
            let number = slot.commits;
            slot.last_commit
                .insert(group.to_string(), (number, proxy.to_string()));

            if let Some(tree) = slot.tree.with_selection(group, proxy) {
                slot.tree = Arc::new(tree);
            } else {
                debug!(
                    "{}/{} is not in the held tree, marking it stale",
                    group, proxy
                );
                slot.stale = true;
            }
        }

        if remember {
            self.inner.overrides.write().insert(group, proxy);
        }
    }

    async fn persist_overrides(&self) {
        let _guard = self.inner.persist.lock().await;
        let overrides = self.overrides();

        if let Err(e) = self.inner.store.save(&overrides).await {
            error!("Failed to save selection overrides: {}", e);
        }
    }
}
