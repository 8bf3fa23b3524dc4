//! Shared wire data model for the cohort cluster: `Message`, `NodeInfo`,
//! `SystemStats`, `AppDescriptor`, and task summaries. Kept free of any
//! async runtime or transport dependency so every other crate can share it.

mod app;
mod message;
mod node_info;
mod stats;
mod task;

pub use app::{AppDescriptor, ClusterApp, ResourceNeeds};
pub use message::{header, Message, MessageType, ProcessType};
pub use node_info::NodeInfo;
pub use stats::{CpuStats, DiskStats, MemoryStats, SystemInfo, SystemStats};
pub use task::{TaskRunnerStats, TaskStatus, TaskSummary};
