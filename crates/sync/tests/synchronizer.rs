//! Synchronizer behaviour against the mock engine

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_api::{ControlApi, ControlApiErrorKind, DelayProbe, GroupRecord, RoutingMode};
use switchyard_api_mock::MockControlApi;
use switchyard_latency::LatencyCache;
use switchyard_overrides::{
    FileOverrideStore, MemoryOverrideStore, OverrideStore, OverrideStoreError,
    SelectedProxyOverrides,
};
use switchyard_sync::{
    ModeGate, Rejection, SelectionOutcome, SelectionRequest, SelectionState, SyncError,
    Synchronizer, SynchronizerConfig,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("switchyard_sync=debug")
        .with_test_writer()
        .try_init();
}

fn leaf(name: &str) -> GroupRecord {
    GroupRecord::new(name, "Shadowsocks", "", Vec::<String>::new())
}

fn engine(mode: RoutingMode) -> MockControlApi {
    MockControlApi::new(
        vec![
            GroupRecord::new("GLOBAL", "Selector", "Proxy", ["Proxy", "auto", "hk", "jp"]),
            GroupRecord::new("Proxy", "Selector", "hk", ["auto", "hk", "jp"]),
            GroupRecord::new("Streaming", "Selector", "jp", ["hk", "jp"]),
            GroupRecord::new("auto", "URLTest", "hk", ["hk", "jp"]),
            leaf("hk"),
            leaf("jp"),
        ],
        mode,
    )
}

async fn synchronizer<S: OverrideStore>(
    api: &MockControlApi,
    store: S,
    mode: RoutingMode,
) -> Synchronizer<MockControlApi, S> {
    Synchronizer::new(
        api.clone(),
        store,
        ModeGate::new(mode),
        LatencyCache::new(),
        SynchronizerConfig::default(),
    )
    .await
    .unwrap()
}

fn names<A: ControlApi, S: OverrideStore>(sync: &Synchronizer<A, S>) -> Vec<String> {
    sync.render_tree()
        .tree
        .groups()
        .iter()
        .map(|group| group.name.clone())
        .collect()
}

#[tokio::test]
async fn test_tree_is_stale_until_first_refresh() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;

    let rendered = sync.render_tree();
    assert!(rendered.stale);
    assert!(rendered.tree.is_empty());
    assert!(sync.snapshot().is_none());

    let report = sync.refresh().await.unwrap();
    assert!(report.self_heal.is_empty());

    let rendered = sync.render_tree();
    assert!(!rendered.stale);
    assert_eq!(names(&sync), vec!["auto", "Streaming", "Proxy"]);
    assert_eq!(rendered.tree.selected("Proxy"), Some("hk"));
    assert_eq!(sync.snapshot().unwrap().len(), 6);
}

#[tokio::test]
async fn test_committed_selection_updates_tree_and_overrides() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let store = MemoryOverrideStore::new();
    let sync = synchronizer(&api, store.clone(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();

    let outcome = sync.request_select("Proxy", "jp").await;

    assert_eq!(outcome, SelectionOutcome::Committed);
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("jp"));
    assert_eq!(sync.overrides().get("Proxy"), Some("jp"));
    assert_eq!(store.load().await.unwrap().get("Proxy"), Some("jp"));
    assert_eq!(api.record("Proxy").await.unwrap().now, "jp");
    assert_eq!(sync.selection_state("Proxy"), SelectionState::Idle);

    let members = sync.render_tree().tree.group("Proxy").unwrap().members().to_vec();
    assert_eq!(members.iter().filter(|m| m.selected).count(), 1);
}

#[tokio::test]
async fn test_rejected_selection_changes_nothing() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let store = MemoryOverrideStore::new();
    let sync = synchronizer(&api, store.clone(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();
    api.reject_selections_for("Proxy").await;

    let outcome = sync.request_select("Proxy", "jp").await;

    assert!(matches!(
        outcome,
        SelectionOutcome::Rejected(Rejection::Remote {
            kind: ControlApiErrorKind::Rejected,
            ..
        })
    ));
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("hk"));
    assert!(sync.overrides().is_empty());
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unanswered_selection_times_out() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let _held = api.hold_selections().await;
    let sync = Synchronizer::new(
        api.clone(),
        MemoryOverrideStore::new(),
        ModeGate::new(RoutingMode::RuleBased),
        LatencyCache::new(),
        SynchronizerConfig {
            request_timeout: Duration::from_millis(50),
        },
    )
    .await
    .unwrap();
    sync.refresh().await.unwrap();

    let outcome = sync.request_select("Proxy", "jp").await;

    assert_eq!(
        outcome,
        SelectionOutcome::Rejected(Rejection::Timeout(Duration::from_millis(50)))
    );
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("hk"));
    assert!(sync.overrides().is_empty());
    assert_eq!(sync.selection_state("Proxy"), SelectionState::Idle);
}

#[tokio::test]
async fn test_latest_selection_wins() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();
    let mut held = api.hold_selections().await;

    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.request_select("Proxy", "jp").await }
    });
    let first_call = held.recv().await.unwrap();
    assert_eq!(
        sync.selection_state("Proxy"),
        SelectionState::Pending {
            proxy: "jp".to_string()
        }
    );

    let second = tokio::spawn({
        let sync = sync.clone();
        async move { sync.request_select("Proxy", "auto").await }
    });
    let second_call = held.recv().await.unwrap();

    first_call.accept();
    assert_eq!(
        first.await.unwrap(),
        SelectionOutcome::Rejected(Rejection::Superseded)
    );
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("hk"));
    assert!(sync.overrides().is_empty());

    second_call.accept();
    assert_eq!(second.await.unwrap(), SelectionOutcome::Committed);
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("auto"));
    assert_eq!(sync.overrides().get("Proxy"), Some("auto"));
}

#[tokio::test]
async fn test_direct_mode_skips_fetch() {
    init_tracing();
    let api = engine(RoutingMode::Direct);
    api.fail_fetches(Some("engine down")).await;
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::Direct).await;

    let report = sync.refresh().await.unwrap();

    assert!(report.tree.is_empty());
    assert!(report.self_heal.is_empty());
    assert!(!sync.render_tree().stale);
}

#[tokio::test]
async fn test_global_mode_self_heals_empty_selection() {
    init_tracing();
    let api = MockControlApi::new(
        vec![
            GroupRecord::new("GLOBAL", "Selector", "", ["p1", "p2"]),
            leaf("p1"),
            leaf("p2"),
        ],
        RoutingMode::Global,
    );
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::Global).await;

    let report = sync.refresh().await.unwrap();
    assert_eq!(report.tree.selected("GLOBAL"), Some("p1"));

    let settled = report.settle().await;
    assert_eq!(
        settled,
        vec![(
            SelectionRequest::new("GLOBAL", "p1"),
            SelectionOutcome::Committed
        )]
    );
    assert_eq!(
        api.selection_calls().await,
        vec![("GLOBAL".to_string(), "p1".to_string())]
    );
    assert_eq!(api.record("GLOBAL").await.unwrap().now, "p1");
    assert_eq!(sync.render_tree().tree.selected("GLOBAL"), Some("p1"));

    // A default is not a user choice.
    assert!(sync.overrides().is_empty());
}

#[tokio::test]
async fn test_refresh_picks_up_engine_side_changes() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();

    api.set_record(GroupRecord::new("Proxy", "Selector", "auto", ["auto", "hk", "jp"]))
        .await;
    api.set_record(GroupRecord::new("Gaming", "Selector", "jp", ["hk", "jp"]))
        .await;
    sync.refresh().await.unwrap();

    let tree = sync.render_tree().tree;
    assert_eq!(names(&sync), vec!["auto", "Streaming", "Proxy", "Gaming"]);
    assert_eq!(tree.selected("Proxy"), Some("auto"));
    assert_eq!(tree.selected("Gaming"), Some("jp"));
}

#[tokio::test]
async fn test_fetch_failure_keeps_previous_tree() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();

    api.fail_fetches(Some("connection refused")).await;
    let err = sync.refresh().await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Fetch {
            kind: ControlApiErrorKind::Unreachable,
            ..
        }
    ));
    let rendered = sync.render_tree();
    assert!(rendered.stale);
    assert_eq!(names(&sync), vec!["auto", "Streaming", "Proxy"]);

    api.fail_fetches(None).await;
    sync.refresh().await.unwrap();
    assert!(!sync.render_tree().stale);
}

#[tokio::test]
async fn test_mode_change_invalidates_tree() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();
    let mut changes = sync.mode().subscribe();

    sync.change_mode(RoutingMode::Global).await.unwrap();

    assert!(changes.has_changed().unwrap());
    assert_eq!(*changes.borrow_and_update(), RoutingMode::Global);
    assert_eq!(api.fetch_mode().await.unwrap(), RoutingMode::Global);
    assert!(sync.render_tree().stale);

    let report = sync.refresh().await.unwrap();
    assert_eq!(names(&sync), vec!["auto", "GLOBAL"]);
    assert!(!sync.render_tree().stale);

    // "now" pointed at the Proxy group, which global mode does not offer.
    let settled = report.settle().await;
    assert_eq!(
        settled,
        vec![(
            SelectionRequest::new("GLOBAL", "auto"),
            SelectionOutcome::Committed
        )]
    );
}

#[tokio::test]
async fn test_sync_mode_follows_engine() {
    init_tracing();
    let api = engine(RoutingMode::Global);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;

    assert_eq!(sync.sync_mode().await.unwrap(), RoutingMode::Global);
    assert_eq!(sync.mode().get(), RoutingMode::Global);
}

#[tokio::test]
async fn test_selection_outside_tree_marks_it_stale() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, MemoryOverrideStore::new(), RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();

    // GLOBAL is hidden in rule mode, but the engine still accepts the change.
    let outcome = sync.request_select("GLOBAL", "jp").await;

    assert_eq!(outcome, SelectionOutcome::Committed);
    assert!(sync.render_tree().stale);
    assert_eq!(sync.overrides().get("GLOBAL"), Some("jp"));
}

#[tokio::test]
async fn test_restore_reapplies_saved_choices() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let saved: SelectedProxyOverrides = [("Proxy", "jp"), ("Streaming", "us"), ("auto", "jp")]
        .into_iter()
        .collect();
    let sync = synchronizer(
        &api,
        MemoryOverrideStore::with_overrides(saved),
        RoutingMode::RuleBased,
    )
    .await;
    sync.refresh().await.unwrap();

    let restored = sync.restore_overrides().await;

    // Streaming's saved proxy is gone and auto is not user-switchable.
    assert_eq!(
        restored,
        vec![(
            SelectionRequest::new("Proxy", "jp"),
            SelectionOutcome::Committed
        )]
    );
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("jp"));
    assert_eq!(sync.render_tree().tree.selected("Streaming"), Some("jp"));

    // Nothing left to restore once the engine agrees.
    assert!(sync.restore_overrides().await.is_empty());
}

#[tokio::test]
async fn test_overrides_survive_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("overrides.json");

    {
        let api = engine(RoutingMode::RuleBased);
        let sync = synchronizer(&api, FileOverrideStore::new(&path), RoutingMode::RuleBased).await;
        sync.refresh().await.unwrap();
        assert_eq!(
            sync.request_select("Streaming", "hk").await,
            SelectionOutcome::Committed
        );
    }

    // A fresh engine has forgotten the choice; the file has not.
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, FileOverrideStore::new(&path), RoutingMode::RuleBased).await;
    assert_eq!(sync.overrides().get("Streaming"), Some("hk"));

    sync.refresh().await.unwrap();
    assert_eq!(sync.render_tree().tree.selected("Streaming"), Some("jp"));

    sync.restore_overrides().await;
    assert_eq!(sync.render_tree().tree.selected("Streaming"), Some("hk"));
    assert_eq!(api.record("Streaming").await.unwrap().now, "hk");
}

#[derive(Debug)]
struct Broken;

impl fmt::Display for Broken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "disk full")
    }
}

impl std::error::Error for Broken {}

impl OverrideStoreError for Broken {}

#[derive(Clone, Debug)]
struct BrokenStore;

#[async_trait]
impl OverrideStore for BrokenStore {
    type Error = Broken;

    async fn load(&self) -> Result<SelectedProxyOverrides, Self::Error> {
        Ok(SelectedProxyOverrides::new())
    }

    async fn save(&self, _overrides: &SelectedProxyOverrides) -> Result<(), Self::Error> {
        Err(Broken)
    }
}

#[tokio::test]
async fn test_save_failure_keeps_commit() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let sync = synchronizer(&api, BrokenStore, RoutingMode::RuleBased).await;
    sync.refresh().await.unwrap();

    let outcome = sync.request_select("Proxy", "jp").await;

    assert_eq!(outcome, SelectionOutcome::Committed);
    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("jp"));
    assert_eq!(sync.overrides().get("Proxy"), Some("jp"));
}

/// Mock engine whose next topology fetch can be parked after the engine answered.
#[derive(Clone, Debug)]
struct GatedEngine {
    engine: MockControlApi,
    hold_next_fetch: Arc<AtomicBool>,
    fetched: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedEngine {
    fn new(engine: MockControlApi) -> Self {
        Self {
            engine,
            hold_next_fetch: Arc::new(AtomicBool::new(false)),
            fetched: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ControlApi for GatedEngine {
    type Error = switchyard_api_mock::Error;

    async fn fetch_groups(&self) -> Result<HashMap<String, GroupRecord>, Self::Error> {
        let records = self.engine.fetch_groups().await?;

        if self.hold_next_fetch.swap(false, Ordering::SeqCst) {
            self.fetched.notify_one();
            self.release.notified().await;
        }

        Ok(records)
    }

    async fn set_group_selection(&self, group: &str, proxy: &str) -> Result<(), Self::Error> {
        self.engine.set_group_selection(group, proxy).await
    }

    async fn fetch_mode(&self) -> Result<RoutingMode, Self::Error> {
        self.engine.fetch_mode().await
    }

    async fn set_mode(&self, mode: RoutingMode) -> Result<(), Self::Error> {
        self.engine.set_mode(mode).await
    }

    async fn measure_delay(
        &self,
        proxy: &str,
        probe: &DelayProbe,
    ) -> Result<Duration, Self::Error> {
        self.engine.measure_delay(proxy, probe).await
    }
}

#[tokio::test]
async fn test_commit_during_rebuild_survives_it() {
    init_tracing();
    let api = GatedEngine::new(engine(RoutingMode::RuleBased));
    let sync = Synchronizer::new(
        api.clone(),
        MemoryOverrideStore::new(),
        ModeGate::new(RoutingMode::RuleBased),
        LatencyCache::new(),
        SynchronizerConfig::default(),
    )
    .await
    .unwrap();
    sync.refresh().await.unwrap();

    api.hold_next_fetch.store(true, Ordering::SeqCst);
    let refresh = tokio::spawn({
        let sync = sync.clone();
        async move { sync.refresh().await }
    });

    // The engine has answered with Proxy -> hk; the rebuild is not stored yet.
    api.fetched.notified().await;
    assert_eq!(
        sync.request_select("Proxy", "jp").await,
        SelectionOutcome::Committed
    );
    api.release.notify_one();

    let report = refresh.await.unwrap().unwrap();
    assert!(report.self_heal.is_empty());
    assert_eq!(report.tree.selected("Proxy"), Some("jp"));

    let rendered = sync.render_tree();
    assert_eq!(rendered.tree.selected("Proxy"), Some("jp"));
    assert!(!rendered.stale);
    assert_eq!(sync.overrides().get("Proxy"), Some("jp"));
}

async fn wait_for_engine(api: &MockControlApi, group: &str, proxy: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while api.record(group).await.map(|record| record.now) != Some(proxy.to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_run_restores_once_engine_is_reachable() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    api.fail_fetches(Some("engine starting")).await;
    let saved: SelectedProxyOverrides = [("Proxy", "jp")].into_iter().collect();
    let sync = synchronizer(
        &api,
        MemoryOverrideStore::with_overrides(saved),
        RoutingMode::RuleBased,
    )
    .await;

    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let sync = sync.clone();
        let shutdown = shutdown.clone();
        async move { sync.run(Duration::from_millis(10), shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sync.render_tree().stale);
    assert!(api.selection_calls().await.is_empty());

    api.fail_fetches(None).await;
    wait_for_engine(&api, "Proxy", "jp").await;

    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(sync.render_tree().tree.selected("Proxy"), Some("jp"));
}

#[tokio::test]
async fn test_run_restores_after_mode_change() {
    init_tracing();
    let api = engine(RoutingMode::RuleBased);
    let saved: SelectedProxyOverrides = [("Proxy", "jp"), ("GLOBAL", "hk")].into_iter().collect();
    let sync = synchronizer(
        &api,
        MemoryOverrideStore::with_overrides(saved),
        RoutingMode::RuleBased,
    )
    .await;

    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let sync = sync.clone();
        let shutdown = shutdown.clone();
        async move { sync.run(Duration::from_millis(10), shutdown).await }
    });

    wait_for_engine(&api, "Proxy", "jp").await;
    // GLOBAL is hidden in rule mode, so its saved choice waits.
    assert_eq!(api.record("GLOBAL").await.unwrap().now, "Proxy");

    sync.change_mode(RoutingMode::Global).await.unwrap();

    // Global mode heals GLOBAL away from the Proxy group, then the saved choice wins.
    wait_for_engine(&api, "GLOBAL", "hk").await;

    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(sync.overrides().get("GLOBAL"), Some("hk"));
}
