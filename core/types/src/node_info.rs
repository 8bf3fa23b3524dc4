use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::AppDescriptor;
use crate::stats::SystemStats;

/// Membership identity is `name`; the pair `(name, endpoint)` changes
/// iff a peer moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub stats: Option<SystemStats>,
    #[serde(default)]
    pub apps: Vec<AppDescriptor>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            hostname: String::new(),
            stats: None,
            apps: Vec::new(),
            extra: HashMap::new(),
        }
    }

    /// Extension field for an SSH target port, per `spec.md` §9:
    /// `node_info.data['ssh']['port']`, optional, default 22.
    pub fn ssh_port(&self) -> u16 {
        self.extra
            .get("ssh")
            .and_then(|v| v.get("port"))
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(22)
    }
}
