//! Default `StatsSource`: a periodic `sysinfo` snapshot with last-known-value
//! fallback on a transient collection failure (`spec.md` §1, §7).

use std::panic;

use async_trait::async_trait;
use cohort_interfaces::StatsSource;
use cohort_types::{CpuStats, DiskStats, MemoryStats, SystemInfo, SystemStats};
use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::warn;

/// Wraps a `sysinfo::System`; refreshed on every `snapshot()` call rather
/// than on a background timer, since the caller (`Node`'s own stats tick)
/// already controls the cadence.
pub struct SysinfoStatsSource {
    system: Mutex<System>,
    last: Mutex<SystemStats>,
}

impl SysinfoStatsSource {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
            last: Mutex::new(SystemStats::default()),
        }
    }

    /// `sysinfo` has no direct BogoMIPS figure; approximate it as
    /// `frequency_mhz * logical_cores`, a stand-in good enough for relative
    /// ranking (`RankingEngine` only compares magnitudes across nodes).
    fn collect(system: &mut System) -> SystemStats {
        system.refresh_cpu();
        system.refresh_memory();

        let cpus = system.cpus();
        let per_cpu: Vec<f64> = cpus.iter().map(|c| c.cpu_usage() as f64 / 100.0).collect();
        let usage = if per_cpu.is_empty() {
            0.0
        } else {
            per_cpu.iter().sum::<f64>() / per_cpu.len() as f64
        };
        let frequency = cpus.first().map(|c| c.frequency()).unwrap_or(0);
        let bogomips = frequency as f64 * cpus.len() as f64;

        let load = System::load_average();

        SystemStats {
            cpu: CpuStats {
                usage,
                per_cpu,
                processors: cpus.len() as u32,
                bogomips,
            },
            memory: MemoryStats {
                total: system.total_memory(),
                used: system.used_memory(),
                available: system.available_memory(),
            },
            system: SystemInfo {
                load: [load.one, load.five, load.fifteen],
                name: System::name().unwrap_or_default(),
                platform: System::long_os_version().unwrap_or_default(),
            },
            disk: DiskStats { ioload: 0.0 },
        }
    }
}

impl Default for SysinfoStatsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsSource for SysinfoStatsSource {
    async fn snapshot(&self) -> SystemStats {
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let mut system = self.system.lock();
            Self::collect(&mut system)
        }));

        match outcome {
            Ok(stats) => {
                *self.last.lock() = stats.clone();
                stats
            }
            Err(_) => {
                warn!("stats collection failed, falling back to last known snapshot");
                self.last.lock().clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reports_at_least_one_processor() {
        let source = SysinfoStatsSource::new();
        let stats = source.snapshot().await;
        assert!(stats.cpu.processors >= 1);
    }

    #[tokio::test]
    async fn usage_stays_within_unit_interval() {
        let source = SysinfoStatsSource::new();
        let stats = source.snapshot().await;
        assert!(stats.cpu.usage >= 0.0 && stats.cpu.usage <= 1.0);
    }
}
