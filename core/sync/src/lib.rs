//! Gossip membership core (`spec.md` §4.6), grounded in
//! `troup/node.py`'s `SyncManager`/`RandomBuffer`.

mod random_buffer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cohort_bus::{MessageBus, SubscriptionId};
use cohort_channel::Channel;
use cohort_clock::IntervalTimer;
use cohort_interfaces::Clock;
use cohort_manager::{ChannelManager, ManagerEvent};
use cohort_types::{header, Message, MessageType, NodeInfo};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

pub use random_buffer::RandomBuffer;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown node: {0}")]
    NotFound(String),
}

/// Holds `knownNodes` behind one lock (`spec.md` §5), ticks a gossip fanout
/// on an `IntervalTimer`, and prunes membership on `channel.closed`.
pub struct SyncManager {
    node_name: String,
    manager: Arc<ChannelManager>,
    known_nodes: Mutex<HashMap<String, NodeInfo>>,
    random_buffer: Mutex<RandomBuffer>,
    sync_percent: f64,
    timer: IntervalTimer,
    get_node_info: Box<dyn Fn() -> NodeInfo + Send + Sync>,
    closed_sub: Mutex<Option<SubscriptionId>>,
}

impl SyncManager {
    pub fn new(
        node_name: impl Into<String>,
        manager: Arc<ChannelManager>,
        sync_interval_ms: u64,
        sync_percent: f64,
        get_node_info: Box<dyn Fn() -> NodeInfo + Send + Sync>,
    ) -> Arc<Self> {
        let interval = Duration::from_millis(sync_interval_ms);
        Arc::new(Self {
            node_name: node_name.into(),
            manager,
            known_nodes: Mutex::new(HashMap::new()),
            random_buffer: Mutex::new(RandomBuffer::new()),
            sync_percent,
            timer: IntervalTimer::new("sync-tick", interval, interval),
            get_node_info,
            closed_sub: Mutex::new(None),
        })
    }

    /// Subscribes to the node's typed dispatch bus for `sync-message`, to
    /// the channel manager's own `channel.closed` event, and arms the
    /// gossip timer.
    pub fn start(self: &Arc<Self>, clock: Arc<dyn Clock>, dispatch: &MessageBus<(Message, Arc<Channel>)>) {
        let this = self.clone();
        dispatch.on(
            "sync-message",
            Box::new(move |(msg, _channel): &(Message, Arc<Channel>)| {
                this.on_sync_message(msg);
                Ok(())
            }),
        );

        let this = self.clone();
        let closed_id = self.manager.events().on(
            "channel.closed",
            Box::new(move |event: &ManagerEvent| {
                if let ManagerEvent::Closed(channel) = event {
                    this.on_closed_channel(channel);
                }
                Ok(())
            }),
        );
        *self.closed_sub.lock() = Some(closed_id);

        let this = self.clone();
        self.timer.start(
            clock,
            Box::new(move || {
                let this = this.clone();
                tokio::spawn(async move { this.sync_tick().await });
            }),
        );
    }

    pub fn stop(&self) {
        self.timer.cancel();
        if let Some(id) = self.closed_sub.lock().take() {
            self.manager.events().remove("channel.closed", id);
        }
    }

    /// Seeds membership, e.g. from configured bootstrap neighbours.
    pub fn register_node(self: &Arc<Self>, node: NodeInfo) {
        self.merge_nodes_list(vec![node]);
    }

    pub fn node_info(&self, name: &str) -> Result<NodeInfo, SyncError> {
        self.known_nodes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(name.to_string()))
    }

    pub fn known_nodes(&self) -> Vec<NodeInfo> {
        self.known_nodes.lock().values().cloned().collect()
    }

    fn on_sync_message(self: &Arc<Self>, msg: &Message) {
        let Some(node) = msg
            .data
            .get("node")
            .and_then(|v| serde_json::from_value::<NodeInfo>(v.clone()).ok())
        else {
            warn!("sync-message missing a parseable node entry");
            return;
        };
        let known_nodes: Vec<NodeInfo> = msg
            .data
            .get("known_nodes")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let mut incoming = vec![node];
        incoming.extend(known_nodes);
        self.merge_nodes_list(incoming);
    }

    /// Inserts or replaces each node; a changed `endpoint` schedules the
    /// stale channel for teardown. `node.name == self.node_name` is skipped
    /// so a node never tracks itself as a peer.
    fn merge_nodes_list(self: &Arc<Self>, nodes: Vec<NodeInfo>) {
        let mut stale_endpoints = Vec::new();
        {
            let mut known = self.known_nodes.lock();
            for node in nodes {
                if node.name == self.node_name {
                    continue;
                }
                match known.get(&node.name) {
                    None => info!(node = %node.name, "node joined"),
                    Some(existing) if existing.endpoint != node.endpoint => {
                        stale_endpoints.push(existing.endpoint.clone());
                    }
                    _ => {}
                }
                known.insert(node.name.clone(), node);
            }
        }
        if !stale_endpoints.is_empty() {
            let manager = self.manager.clone();
            tokio::spawn(async move {
                for url in stale_endpoints {
                    manager.close_by_url(&url).await;
                }
            });
        }
    }

    fn on_closed_channel(&self, channel: &Arc<Channel>) {
        let url = channel.to_url().to_string();
        let mut known = self.known_nodes.lock();
        let before = known.len();
        known.retain(|_, n| n.endpoint != url);
        if known.len() != before {
            warn!(endpoint = %url, "peer probably left");
        }
    }

    async fn sync_tick(self: &Arc<Self>) {
        let members: Vec<String> = self.known_nodes.lock().keys().cloned().collect();
        if members.is_empty() {
            return;
        }
        let n = (members.len() as f64 * self.sync_percent).ceil() as usize;
        let targets = self.random_buffer.lock().next(n, &members);

        let message = self.build_sync_message();
        let Ok(payload) = message.serialize() else {
            warn!("failed to serialize sync message");
            return;
        };

        for name in targets {
            let endpoint = self.known_nodes.lock().get(&name).map(|n| n.endpoint.clone());
            let Some(endpoint) = endpoint else { continue };
            // Send failures (including a closed channel) are swallowed here;
            // the corresponding `channel.closed` event prunes the peer.
            if let Err(e) = self
                .manager
                .send(Some(&name), Some(&endpoint), payload.clone().into_bytes())
                .await
            {
                warn!(node = %name, error = %e, "sync send failed");
            }
        }
    }

    fn build_sync_message(&self) -> Message {
        let info = (self.get_node_info)();
        let known_nodes: Vec<NodeInfo> = self.known_nodes.lock().values().cloned().collect();
        Message::new(serde_json::json!({ "node": info, "known_nodes": known_nodes }))
            .set_header(header::TYPE, MessageType::SyncMessage.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_channel::{memory::MemoryTransport, EarlyStrategy};

    fn node(name: &str, endpoint: &str) -> NodeInfo {
        NodeInfo::new(name, endpoint)
    }

    fn manager() -> Arc<ChannelManager> {
        ChannelManager::new(Arc::new(MemoryTransport::new()), EarlyStrategy::default())
    }

    fn sync_manager() -> Arc<SyncManager> {
        SyncManager::new(
            "self",
            manager(),
            10_000,
            0.3,
            Box::new(|| NodeInfo::new("self", "ws://self:9000")),
        )
    }

    #[test]
    fn register_node_seeds_membership() {
        let sm = sync_manager();
        sm.register_node(node("peer-a", "ws://peer-a:9000"));
        assert_eq!(sm.node_info("peer-a").unwrap().endpoint, "ws://peer-a:9000");
    }

    #[test]
    fn node_info_unknown_errors() {
        let sm = sync_manager();
        assert!(matches!(sm.node_info("nope"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn self_name_never_becomes_a_peer() {
        let sm = sync_manager();
        sm.register_node(node("self", "ws://self:9000"));
        assert!(sm.known_nodes().is_empty());
    }

    #[test]
    fn sync_message_parses_node_and_known_nodes() {
        let sm = sync_manager();
        let msg = Message::new(serde_json::json!({
            "node": node("peer-a", "ws://peer-a:9000"),
            "known_nodes": [node("peer-b", "ws://peer-b:9000")],
        }))
        .set_header(header::TYPE, MessageType::SyncMessage.as_str());
        sm.on_sync_message(&msg);
        assert_eq!(sm.known_nodes().len(), 2);
    }

    #[test]
    fn endpoint_change_replaces_entry() {
        let sm = sync_manager();
        sm.register_node(node("peer-a", "ws://peer-a:9000"));
        sm.register_node(node("peer-a", "ws://peer-a:9999"));
        assert_eq!(sm.node_info("peer-a").unwrap().endpoint, "ws://peer-a:9999");
    }

    /// `spec.md` §8 scenario 6: a channel close for a known peer's endpoint
    /// prunes that peer from membership; a close for an unrelated endpoint
    /// leaves membership untouched. Built directly against `on_closed_channel`
    /// rather than through `MemoryTransport::accept`, whose `peer_url` is the
    /// dialed address rather than the dialer's identity and so can't stand in
    /// for a real peer endpoint here.
    #[test]
    fn closed_channel_prunes_matching_peer_only() {
        let sm = sync_manager();
        sm.register_node(node("peer-a", "ws://peer-a:9000"));
        sm.register_node(node("peer-b", "ws://peer-b:9000"));

        let unrelated = Channel::outgoing("unrelated", "ws://peer-c:9000", EarlyStrategy::default());
        sm.on_closed_channel(&unrelated);
        assert_eq!(sm.known_nodes().len(), 2, "closing an unknown endpoint prunes nothing");

        let gone = Channel::outgoing("peer-a", "ws://peer-a:9000", EarlyStrategy::default());
        sm.on_closed_channel(&gone);
        let remaining = sm.known_nodes();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "peer-b");
    }
}
