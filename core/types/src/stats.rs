use serde::{Deserialize, Serialize};

/// CPU utilization and capacity figures for a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    /// Overall usage in `[0, 1]`.
    pub usage: f64,
    pub per_cpu: Vec<f64>,
    pub processors: u32,
    pub bogomips: f64,
}

impl Default for CpuStats {
    fn default() -> Self {
        Self {
            usage: 0.0,
            per_cpu: Vec::new(),
            processors: 0,
            bogomips: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemInfo {
    /// `[1m, 5m, 15m]` load averages.
    pub load: [f64; 3],
    pub name: String,
    pub platform: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DiskStats {
    /// Normalized I/O load in `[0, 1]`.
    pub ioload: f64,
}

/// Point-in-time measurement of a node's system load, produced by
/// `StatsSource` and consumed read-only by `RankingEngine` and
/// `SyncManager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemStats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub system: SystemInfo,
    pub disk: DiskStats,
}
