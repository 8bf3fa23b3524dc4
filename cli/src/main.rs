//! `cohortd`: the node process's command-line entry point (`spec.md` §6).
//! Parses flags, assembles a `Node` from the default adapters, and runs it
//! until `SIGINT`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cohort_catalog::JsonFileAppCatalog;
use cohort_channel::tungstenite::TungsteniteTransport;
use cohort_clock::SystemClock;
use cohort_interfaces::{Clock, StatsSource, Transport, WithStartAndShutdown};
use cohort_launcher::DefaultProcessLauncher;
use cohort_node::{Node, NodeConfig};
use cohort_stats::SysinfoStatsSource;

#[derive(Parser, Debug)]
#[command(name = "cohortd", about = "A peer-to-peer gossiping cluster node")]
struct Args {
    /// This node's name, advertised to peers.
    #[arg(long, default_value = "node")]
    node: String,

    /// Bootstrap neighbours as repeated "name:ws://host:port" entries.
    #[arg(long = "neighbours", value_name = "NAME:URL")]
    neighbours: Vec<String>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 7000)]
    port: u16,

    /// Directory for the app catalog and other node-local state.
    #[arg(long, default_value = "/tmp/cohort")]
    storage_root: PathBuf,

    #[arg(long = "stats-update-interval", default_value_t = 5_000)]
    stats_update_interval: u64,

    /// Refuse to start if another node already holds the local lock file.
    #[arg(long)]
    lock: bool,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    #[arg(long = "sync-interval", default_value_t = 10_000)]
    sync_interval: u64,

    #[arg(long = "sync-percent", default_value_t = 0.3)]
    sync_percent: f64,

    #[arg(long = "max-workers", default_value_t = 3)]
    max_workers: usize,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        let defaults = NodeConfig::default();
        Self {
            node_name: args.node,
            neighbours: args.neighbours,
            host: args.host,
            port: args.port,
            storage_root: args.storage_root,
            stats_update_interval_ms: args.stats_update_interval,
            lock: args.lock,
            sync_interval_ms: args.sync_interval,
            sync_percent: args.sync_percent,
            max_workers: args.max_workers,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    let config: NodeConfig = args.into();
    let catalog = Arc::new(JsonFileAppCatalog::load(&config.storage_root).await);

    let node = Node::new(
        config,
        Arc::new(TungsteniteTransport) as Arc<dyn Transport>,
        Arc::new(SysinfoStatsSource::new()) as Arc<dyn StatsSource>,
        catalog,
        Arc::new(DefaultProcessLauncher::new()),
        Arc::new(SystemClock) as Arc<dyn Clock>,
    );

    if let Err(e) = node.start_node().await {
        tracing::error!(error = %e, "failed to start node");
        return std::process::ExitCode::FAILURE;
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received SIGINT, shutting down"),
        Err(e) => tracing::error!(error = %e, "failed to install SIGINT handler"),
    }

    node.shutdown().await;
    std::process::ExitCode::SUCCESS
}
