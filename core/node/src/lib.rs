//! The `Node` facade (`spec.md` §4.7): wires the channel manager, sync
//! manager, request tracker, and task runner together behind one
//! `WithStartAndShutdown` lifecycle, grounded in `troup/node.py`'s `Node`.

mod commands;
mod config;
mod lock_file;

pub use config::NodeConfig;
pub use lock_file::{LockFileError, NodeInfoFile};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use cohort_bus::{MessageBus, SubscriptionId};
use cohort_channel::Channel;
use cohort_clock::IntervalTimer;
use cohort_interfaces::{AppCatalog, Clock, ProcessLauncher, StatsSource, Transport, WithStartAndShutdown};
use cohort_manager::{ChannelManager, ManagerEvent};
use cohort_sync::SyncManager;
use cohort_tasks::TaskRunner;
use cohort_tracker::RequestTracker;
use cohort_types::{header, Message, MessageType, NodeInfo, SystemStats};
use parking_lot::Mutex as SyncMutex;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("lock file conflict: {0}")]
    LockConflict(#[from] LockFileError),
    #[error("channel manager error: {0}")]
    Manager(#[from] cohort_manager::ManagerError),
}

/// A node's public, mergeable identity and load snapshot plus one typed
/// dispatch bus republishing every inbound frame by `headers.type`
/// (`spec.md` §4.7's "Dispatch" paragraph).
pub struct Node {
    config: NodeConfig,
    manager: Arc<ChannelManager>,
    dispatch: MessageBus<(Message, Arc<Channel>)>,
    sync: Arc<SyncManager>,
    tracker: Arc<RequestTracker>,
    task_runner: Arc<TaskRunner>,
    stats_source: Arc<dyn StatsSource>,
    catalog: Arc<dyn AppCatalog>,
    launcher: Arc<dyn ProcessLauncher>,
    clock: Arc<dyn Clock>,
    stats_cache: SyncMutex<SystemStats>,
    stats_timer: IntervalTimer,
    lock_file: SyncMutex<Option<NodeInfoFile>>,
    endpoint: SyncMutex<String>,
    data_sub: SyncMutex<Option<SubscriptionId>>,
    running: AtomicBool,
    /// Lets `&self`-only trait methods (`WithStartAndShutdown`) and
    /// callbacks handed to other components (`SyncManager`'s
    /// `get_node_info`) obtain an `Arc<Node>` without Node holding a
    /// strong reference to itself.
    weak_self: Weak<Node>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        stats_source: Arc<dyn StatsSource>,
        catalog: Arc<dyn AppCatalog>,
        launcher: Arc<dyn ProcessLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let manager = ChannelManager::new(transport, cohort_channel::EarlyStrategy::default());
        let reply_timeout_ms = config.reply_timeout_ms;
        let reply_check_interval_ms = config.reply_check_interval_ms;
        let sync_interval_ms = config.sync_interval_ms;
        let sync_percent = config.sync_percent;
        let max_workers = config.max_workers;
        let stats_interval = std::time::Duration::from_millis(config.stats_update_interval_ms);
        let node_name = config.node_name.clone();

        let tracker = RequestTracker::new(manager.clone(), clock.clone(), reply_timeout_ms, reply_check_interval_ms);
        let task_runner = TaskRunner::new(max_workers);

        Arc::new_cyclic(|weak: &Weak<Node>| {
            let weak_for_info = weak.clone();
            let sync = SyncManager::new(
                node_name,
                manager.clone(),
                sync_interval_ms,
                sync_percent,
                Box::new(move || {
                    weak_for_info
                        .upgrade()
                        .map(|n| n.build_node_info_sync())
                        .unwrap_or_else(|| NodeInfo::new("", ""))
                }),
            );

            Self {
                config,
                manager,
                dispatch: MessageBus::new(),
                sync,
                tracker,
                task_runner,
                stats_source,
                catalog,
                launcher,
                clock,
                stats_cache: SyncMutex::new(SystemStats::default()),
                stats_timer: IntervalTimer::new("node-stats", stats_interval, std::time::Duration::ZERO),
                lock_file: SyncMutex::new(None),
                endpoint: SyncMutex::new(String::new()),
                data_sub: SyncMutex::new(None),
                running: AtomicBool::new(false),
                weak_self: weak.clone(),
            }
        })
    }

    /// Builds a fresh `NodeInfo` snapshot: identity, last stats tick, and
    /// the local catalog's apps.
    pub async fn build_node_info(&self) -> NodeInfo {
        let apps = self.catalog.list().await;
        let mut info = NodeInfo::new(self.config.node_name.clone(), self.endpoint.lock().clone());
        info.stats = Some(self.stats_cache.lock().clone());
        info.apps = apps;
        info
    }

    /// Non-async variant for `SyncManager`'s `get_node_info` callback,
    /// which cannot await; the catalog snapshot is a touch staler than
    /// `build_node_info`'s (bounded by the gossip tick cadence, not the
    /// request path).
    fn build_node_info_sync(&self) -> NodeInfo {
        let mut info = NodeInfo::new(self.config.node_name.clone(), self.endpoint.lock().clone());
        info.stats = Some(self.stats_cache.lock().clone());
        info
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub fn task_runner(&self) -> &Arc<TaskRunner> {
        &self.task_runner
    }

    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.lock().clone()
    }

    fn tick_stats(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let snapshot = this.stats_source.snapshot().await;
            *this.stats_cache.lock() = snapshot;
        });
    }

    /// Registers bootstrap neighbours from `"name:ws://host:port"` entries.
    fn register_neighbours(self: &Arc<Self>) {
        for entry in &self.config.neighbours {
            let Some((name, endpoint)) = entry.split_once(':') else {
                warn!(entry, "malformed neighbour entry, expected name:endpoint");
                continue;
            };
            self.sync.register_node(NodeInfo::new(name, endpoint));
            info!(name, endpoint, "registered bootstrap neighbour");
        }
    }

    /// Deserializes inbound channel frames once and republishes them on
    /// `self.dispatch` keyed by `headers.type`, exactly as `spec.md` §4.7
    /// describes. `SyncManager` subscribes to `sync-message` directly;
    /// `Node` itself subscribes to `command`, `task`, and `reply` below.
    fn wire_dispatch(self: &Arc<Self>) {
        let this = self.clone();
        let id = self.manager.events().on(
            "channel.data",
            Box::new(move |event: &ManagerEvent| {
                let ManagerEvent::Data(channel, bytes) = event else {
                    return Ok(());
                };
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
                let msg = Message::deserialize(text)
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
                let Some(msg_type) = msg.message_type() else {
                    warn!("dropping message with no type header");
                    return Ok(());
                };
                this.dispatch.publish(msg_type.as_str(), &(msg, channel.clone()));
                Ok(())
            }),
        );
        *self.data_sub.lock() = Some(id);

        let this = self.clone();
        self.dispatch.on(
            MessageType::Command.as_str(),
            Box::new(move |(msg, channel): &(Message, Arc<Channel>)| {
                this.handle_and_reply(msg.clone(), channel.clone(), Node::dispatch_command_boxed);
                Ok(())
            }),
        );

        let this = self.clone();
        self.dispatch.on(
            MessageType::Task.as_str(),
            Box::new(move |(msg, channel): &(Message, Arc<Channel>)| {
                this.handle_and_reply(msg.clone(), channel.clone(), Node::dispatch_task_boxed);
                Ok(())
            }),
        );

        let this = self.clone();
        self.dispatch.on(
            MessageType::Reply.as_str(),
            Box::new(move |(msg, _channel): &(Message, Arc<Channel>)| {
                this.tracker.on_reply(msg);
                Ok(())
            }),
        );
    }

    fn dispatch_command_boxed(
        self: Arc<Self>,
        msg: Message,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send>> {
        Box::pin(async move { self.dispatch_command(&msg).await })
    }

    fn dispatch_task_boxed(
        self: Arc<Self>,
        msg: Message,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send>> {
        Box::pin(async move { self.dispatch_task(&msg).await })
    }

    /// Runs a handler, catches its error, and sends the `type=reply`
    /// message back over the channel the request arrived on
    /// (`spec.md` §4.7: "every command produces a reply message").
    fn handle_and_reply(
        self: &Arc<Self>,
        msg: Message,
        channel: Arc<Channel>,
        handler: fn(
            Arc<Self>,
            Message,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send>>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let request_id = msg.id.clone();
            let outcome = handler(this.clone(), msg).await;
            let (reply_value, error) = match outcome {
                Ok(v) => (v, None),
                Err(e) => (serde_json::Value::Null, Some(e.to_string())),
            };
            let reply = Message::new(serde_json::json!({ "reply": reply_value, "error": error }))
                .set_header(header::TYPE, MessageType::Reply.as_str())
                .set_header(header::REPLY_FOR, request_id);
            match reply.serialize() {
                Ok(payload) => {
                    if let Err(e) = channel.send(payload.into_bytes()).await {
                        warn!(error = %e, "failed to send reply");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize reply"),
            }
        });
    }
}

#[async_trait]
impl WithStartAndShutdown for Node {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Delegates to `start_node` via the stored weak self-reference. The
    /// CLI binary should prefer calling `start_node` directly: it surfaces
    /// the `NodeError` a lock-file conflict produces, which this trait's
    /// signature has no room for (`spec.md` §7: startup conflicts are
    /// fatal, not swallowed).
    async fn start(&self) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        if let Err(e) = this.start_node().await {
            tracing::error!(error = %e, "node failed to start");
        }
    }

    async fn shutdown(&self) {
        self.stats_timer.cancel();
        self.sync.stop();
        self.task_runner.shutdown().await;
        self.manager.shutdown().await;
        if let Some(id) = self.data_sub.lock().take() {
            self.manager.events().remove("channel.data", id);
        }
        if let Some(lock) = self.lock_file.lock().take() {
            lock.release();
        }
        self.running.store(false, Ordering::Release);
        info!(node = %self.config.node_name, "node stopped");
    }
}

impl Node {
    /// Acquires the lock file, opens the listener, wires dispatch, starts
    /// `SyncManager`/stats/task pool, and registers neighbours. Fallible,
    /// unlike `WithStartAndShutdown::start` which delegates here.
    pub async fn start_node(self: &Arc<Self>) -> Result<(), NodeError> {
        if self.config.lock {
            let pid = std::process::id();
            let lock = NodeInfoFile::acquire(
                NodeConfig::lock_file_path(),
                pid,
                &self.config.node_name,
                &format!("ws://{}:{}", self.config.host, self.config.port),
                &std::collections::HashMap::new(),
            )?;
            *self.lock_file.lock() = Some(lock);
        }

        let local_addr = self.manager.listen(&self.config.host, self.config.port).await?;
        *self.endpoint.lock() = format!("ws://{local_addr}");

        self.wire_dispatch();

        let initial_snapshot = self.stats_source.snapshot().await;
        *self.stats_cache.lock() = initial_snapshot;
        let this = self.clone();
        self.stats_timer
            .start(self.clock.clone(), Box::new(move || this.tick_stats()));

        self.sync.start(self.clock.clone(), &self.dispatch);
        self.register_neighbours();

        self.task_runner.start_sweeper(self.clock.clone());

        self.running.store(true, Ordering::Release);
        info!(node = %self.config.node_name, endpoint = %self.endpoint(), "node started");
        Ok(())
    }
}
