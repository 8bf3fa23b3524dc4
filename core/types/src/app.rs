use serde::{Deserialize, Serialize};

/// Resource demand of an app, each magnitude non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceNeeds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
}

/// A declaration of a runnable command with resource needs (not the
/// program itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub command: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub needs: ResourceNeeds,
}

/// A cluster-wide app entry: an `AppDescriptor` plus the nodes that
/// declared it, as merged by `Node::apps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterApp {
    #[serde(flatten)]
    pub descriptor: AppDescriptor,
    pub nodes: Vec<String>,
}
