use async_trait::async_trait;

/// Shared start/shutdown shape for every long-running component (the
/// `ChannelManager`'s server, `SyncManager`, `TaskRunner`, `Node`).
///
/// `start` and `shutdown` must be idempotent: calling either twice without
/// an intervening state change should not panic.
#[async_trait]
pub trait WithStartAndShutdown: Send + Sync {
    fn is_running(&self) -> bool;
    async fn start(&self);
    async fn shutdown(&self);
}
