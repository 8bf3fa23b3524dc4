use async_trait::async_trait;
use cohort_types::SystemStats;

/// Port onto OS statistics collection (CPU %, memory, load averages),
/// treated as an external collaborator per `spec.md` §1.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn snapshot(&self) -> SystemStats;
}
