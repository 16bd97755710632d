//! Command line front end for proxy-group selection against a Clash-style controller.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use switchyard_api::{ControlApi, DelayProbe, RoutingMode};
use switchyard_api_http::{HttpControlApi, HttpControlApiConfig};
use switchyard_api_mock::MockControlApi;
use switchyard_latency::{Delay, LatencyCache, LatencyProber, LatencyProberConfig};
use switchyard_overrides::FileOverrideStore;
use switchyard_sync::{
    GroupEntryKind, ModeGate, Rejection, SelectionOutcome, SelectionTree, SyncError, Synchronizer,
    SynchronizerConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP control API setup error
    #[error(transparent)]
    Http(#[from] switchyard_api_http::Error),

    /// Output encoding error
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    /// Mock engine setup error
    #[error(transparent)]
    Mock(#[from] switchyard_api_mock::Error),

    /// The engine did not take the selection
    #[error("selection {group}/{proxy} rejected: {rejection}")]
    Rejected {
        /// Group that was asked to switch
        group: String,

        /// Member it was asked to switch to
        proxy: String,

        /// Why nothing changed
        rejection: Rejection,
    },

    /// Synchronization error
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Base URL of the engine's external controller
    #[arg(
        long,
        default_value = "http://127.0.0.1:9090",
        env = "SWITCHYARD_CONTROLLER_URL"
    )]
    controller_url: Url,

    /// Bearer secret configured on the controller
    #[arg(long, env = "SWITCHYARD_SECRET")]
    secret: Option<String>,

    /// File the per-group selection overrides are kept in
    #[arg(
        long,
        default_value = "/tmp/switchyard/overrides.json",
        env = "SWITCHYARD_OVERRIDES_PATH"
    )]
    overrides_path: PathBuf,

    /// Upper bound for a single controller request, in milliseconds
    #[arg(long, default_value_t = 5000, env = "SWITCHYARD_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: u64,

    /// Serve the topology from a `GET /proxies` document instead of a live controller
    #[arg(long, env = "SWITCHYARD_MOCK_PROXIES_FILE")]
    mock_proxies_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Print the selection tree for the current routing mode
    Tree {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Route a group through one of its members
    Select {
        /// Group name
        group: String,

        /// Member name
        proxy: String,
    },

    /// Print the routing mode, or switch it
    Mode {
        /// `direct`, `global` or `rule`
        mode: Option<RoutingMode>,
    },

    /// Keep the tree in sync and probe latencies until interrupted
    Watch {
        /// Seconds between topology refreshes
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(u64).range(1..),
            env = "SWITCHYARD_REFRESH_INTERVAL_SECS"
        )]
        refresh_interval_secs: u64,

        /// Seconds between latency probe rounds
        #[arg(
            long,
            default_value_t = 600,
            value_parser = clap::value_parser!(u64).range(1..),
            env = "SWITCHYARD_PROBE_INTERVAL_SECS"
        )]
        probe_interval_secs: u64,

        /// URL fetched through each proxy when probing
        #[arg(
            long,
            default_value = "http://www.gstatic.com/generate_204",
            env = "SWITCHYARD_PROBE_URL"
        )]
        probe_url: Url,

        /// Probe timeout, in milliseconds
        #[arg(long, default_value_t = 5000, env = "SWITCHYARD_PROBE_TIMEOUT_MS")]
        probe_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let request_timeout = Duration::from_millis(args.request_timeout_ms);

    if let Some(path) = &args.mock_proxies_file {
        info!("Using mock engine from {}", path.display());
        let api = MockControlApi::from_proxies_file(path, RoutingMode::RuleBased)?;
        return run(api, args).await;
    }

    let api = HttpControlApi::new(HttpControlApiConfig {
        base_url: args.controller_url.clone(),
        secret: args.secret.clone(),
        request_timeout,
    })?;

    run(api, args).await
}

async fn run<A: ControlApi>(api: A, args: Args) -> Result<(), Error> {
    let latency = LatencyCache::new();
    let sync = Synchronizer::new(
        api.clone(),
        FileOverrideStore::new(&args.overrides_path),
        ModeGate::default(),
        latency.clone(),
        SynchronizerConfig {
            request_timeout: Duration::from_millis(args.request_timeout_ms),
        },
    )
    .await?;

    sync.sync_mode().await?;

    match args.command {
        Command::Tree { json } => {
            let report = sync.refresh().await?;
            report.settle().await;

            let rendered = sync.render_tree();
            if json {
                println!("{}", serde_json::to_string_pretty(&*rendered.tree)?);
            } else {
                print_tree(&rendered.tree);
            }
        }
        Command::Select { group, proxy } => {
            sync.refresh().await?.settle().await;

            match sync.request_select(&group, &proxy).await {
                SelectionOutcome::Committed => println!("{group} -> {proxy}"),
                SelectionOutcome::Rejected(rejection) => {
                    return Err(Error::Rejected {
                        group,
                        proxy,
                        rejection,
                    });
                }
            }
        }
        Command::Mode { mode: Some(mode) } => {
            sync.change_mode(mode).await?;
            println!("{mode}");
        }
        Command::Mode { mode: None } => println!("{}", sync.mode().get()),
        Command::Watch {
            refresh_interval_secs,
            probe_interval_secs,
            probe_url,
            probe_timeout_ms,
        } => {
            let prober = LatencyProber::new(
                api,
                latency,
                LatencyProberConfig {
                    interval: Duration::from_secs(probe_interval_secs),
                    probe: DelayProbe {
                        url: probe_url,
                        timeout: Duration::from_millis(probe_timeout_ms),
                    },
                    ..LatencyProberConfig::default()
                },
            );

            watch(&sync, &prober, Duration::from_secs(refresh_interval_secs)).await;
        }
    }

    Ok(())
}

async fn watch<A: ControlApi>(
    sync: &Synchronizer<A, FileOverrideStore>,
    prober: &LatencyProber<A>,
    refresh_interval: Duration,
) {
    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
        signal_shutdown.cancel();
    });

    prober.start().await;
    sync.run(refresh_interval, shutdown).await;

    info!("Shutting down");
    prober.shutdown().await;
}

fn print_tree(tree: &SelectionTree) {
    println!("mode: {}", tree.mode());

    for group in tree.groups() {
        match &group.kind {
            GroupEntryKind::Selector { members } => {
                println!("{} (selector)", group.name);
                for member in members {
                    let marker = if member.selected { '*' } else { ' ' };
                    let delay = match member.latency.map(|sample| sample.delay) {
                        Some(Delay::Measured(delay)) => format!("{}ms", delay.as_millis()),
                        Some(Delay::Unmeasured) => "timeout".to_string(),
                        None => String::new(),
                    };
                    println!("  {marker} {} {delay}", member.name);
                }
            }
            GroupEntryKind::Probed { now } => println!("{} (probed) -> {now}", group.name),
        }
    }
}
