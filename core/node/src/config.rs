use std::path::PathBuf;

/// Shapes one node's runtime, assembled from CLI flags (`spec.md` §6) by
/// `cohort-cli`. No config-file layer: flags are the only input, mirroring
/// the teacher's preference for explicit construction over a generic
/// config loader at this layer.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_name: String,
    /// `"name:ws://host:port"` bootstrap entries (`spec.md` §8 scenario 2).
    pub neighbours: Vec<String>,
    pub host: String,
    pub port: u16,
    pub storage_root: PathBuf,
    pub stats_update_interval_ms: u64,
    pub lock: bool,
    pub sync_interval_ms: u64,
    pub sync_percent: f64,
    pub max_workers: usize,
    pub reply_timeout_ms: u64,
    pub reply_check_interval_ms: u64,
    pub process_buffer_size: usize,
    /// SSH login for `run-app` candidates that resolve to a peer; not a
    /// named CLI flag in `spec.md` §6, so it defaults from the environment
    /// rather than requiring one.
    pub ssh_user: String,
}

impl NodeConfig {
    pub fn lock_file_path() -> PathBuf {
        PathBuf::from("/tmp/cohort.node.lock")
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "node".to_string(),
            neighbours: Vec::new(),
            host: "0.0.0.0".to_string(),
            port: 7000,
            storage_root: std::env::temp_dir().join("cohort"),
            stats_update_interval_ms: 5_000,
            lock: false,
            sync_interval_ms: 10_000,
            sync_percent: 0.3,
            max_workers: 3,
            reply_timeout_ms: 5_000,
            reply_check_interval_ms: 1_000,
            process_buffer_size: 100_000,
            ssh_user: std::env::var("USER").unwrap_or_else(|_| "cohort".to_string()),
        }
    }
}
