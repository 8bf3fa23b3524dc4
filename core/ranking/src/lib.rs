//! Scores candidate nodes against an app's resource needs (`spec.md` §4.5).

use cohort_types::{NodeInfo, ResourceNeeds};

/// `RankingEngine::rank` sorts candidates by descending score, input-order
/// stable on ties; candidates with no `stats` sort last regardless of
/// score. There is no state to hold, so this is a unit struct rather than
/// something constructed per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RankingEngine;

impl RankingEngine {
    pub fn new() -> Self {
        Self
    }

    /// `W[k] = needs[k] / max(needs.values)`; a needs vector of all zeros
    /// makes every weight zero, which is a valid (if useless) ranking
    /// input, not an error.
    fn weights(needs: &ResourceNeeds) -> ResourceNeeds {
        let max = [needs.cpu, needs.memory, needs.disk, needs.network]
            .into_iter()
            .fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return ResourceNeeds::default();
        }
        ResourceNeeds {
            cpu: needs.cpu / max,
            memory: needs.memory / max,
            disk: needs.disk / max,
            network: needs.network / max,
        }
    }

    /// The `network` weight is computed but never applied: the score
    /// formula's network term is a documented no-op hook (`spec.md` §9).
    fn score(weights: &ResourceNeeds, node: &NodeInfo) -> Option<f64> {
        let stats = node.stats.as_ref()?;
        Some(
            weights.cpu * stats.cpu.bogomips * (1.0 - stats.cpu.usage)
                + weights.memory * stats.memory.available as f64
                - weights.disk * stats.disk.ioload,
        )
    }

    /// Stable sort by descending score; nodes with no stats sort last,
    /// in their relative input order among themselves.
    pub fn rank(&self, needs: &ResourceNeeds, candidates: &[NodeInfo]) -> Vec<NodeInfo> {
        let weights = Self::weights(needs);
        let mut scored: Vec<(Option<f64>, NodeInfo)> = candidates
            .iter()
            .map(|n| (Self::score(&weights, n), n.clone()))
            .collect();
        scored.sort_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        scored.into_iter().map(|(_, n)| n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_types::{CpuStats, DiskStats, MemoryStats, SystemInfo, SystemStats};

    fn node(name: &str, bogomips: f64, usage: f64, available: u64, ioload: f64) -> NodeInfo {
        let mut n = NodeInfo::new(name, format!("ws://{name}:9000"));
        n.stats = Some(SystemStats {
            cpu: CpuStats {
                usage,
                per_cpu: vec![],
                processors: 1,
                bogomips,
            },
            memory: MemoryStats {
                total: available * 2,
                used: available,
                available,
            },
            system: SystemInfo::default(),
            disk: DiskStats { ioload },
        });
        n
    }

    fn needs() -> ResourceNeeds {
        ResourceNeeds {
            cpu: 1.0,
            memory: 1.0,
            disk: 1.0,
            network: 0.0,
        }
    }

    #[test]
    fn ranks_free_cpu_and_memory_above_busy_node() {
        let engine = RankingEngine::new();
        let candidates = vec![
            node("busy", 1000.0, 0.9, 1_000_000, 0.1),
            node("idle", 1000.0, 0.1, 8_000_000, 0.1),
        ];
        let ranked = engine.rank(&needs(), &candidates);
        assert_eq!(ranked[0].name, "idle");
    }

    #[test]
    fn missing_stats_sort_last_regardless_of_score() {
        let engine = RankingEngine::new();
        let mut no_stats = NodeInfo::new("ghost", "ws://ghost:9000");
        no_stats.stats = None;
        let candidates = vec![no_stats, node("real", 100.0, 0.5, 100, 0.0)];
        let ranked = engine.rank(&needs(), &candidates);
        assert_eq!(ranked.last().unwrap().name, "ghost");
    }

    #[test]
    fn ties_keep_stable_input_order() {
        let engine = RankingEngine::new();
        let candidates = vec![
            node("a", 100.0, 0.5, 100, 0.0),
            node("b", 100.0, 0.5, 100, 0.0),
        ];
        let ranked = engine.rank(&needs(), &candidates);
        assert_eq!(ranked[0].name, "a");
        assert_eq!(ranked[1].name, "b");
    }

    #[test]
    fn spec_scenario_orders_n2_above_n1_above_n3() {
        let engine = RankingEngine::new();
        let needs = ResourceNeeds {
            cpu: 500.0,
            memory: 128.0,
            disk: 10.0,
            network: 0.05,
        };
        let candidates = vec![
            node("n1", 1000.0, 0.1, 100, 5.0),
            node("n2", 2000.0, 0.2, 100, 5.0),
            node("n3", 3000.0, 0.9, 100, 90.0),
        ];
        let ranked = engine.rank(&needs, &candidates);
        let order: Vec<&str> = ranked.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(order, vec!["n2", "n1", "n3"]);
    }

    #[test]
    fn more_free_memory_never_lowers_score() {
        let engine = RankingEngine::new();
        let low = node("low-mem", 100.0, 0.2, 1_000, 0.0);
        let high = node("high-mem", 100.0, 0.2, 2_000, 0.0);
        let ranked = engine.rank(&needs(), &[low, high]);
        assert_eq!(ranked[0].name, "high-mem");
    }
}
