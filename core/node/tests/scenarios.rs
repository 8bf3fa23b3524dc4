//! End-to-end scenarios (`spec.md` §8) exercised over the wire, using
//! `MemoryTransport` as the dialed/accepted transport on both ends.

use std::sync::Arc;
use std::time::Duration;

use cohort_catalog::JsonFileAppCatalog;
use cohort_channel::memory::MemoryTransport;
use cohort_clock::SystemClock;
use cohort_interfaces::{Clock, StatsSource, Transport, TransportEvent, TransportReceiver, TransportSender};
use cohort_launcher::DefaultProcessLauncher;
use cohort_node::{Node, NodeConfig};
use cohort_stats::SysinfoStatsSource;
use cohort_types::{header, Message, ProcessType};

async fn spawn_node(
    name: &str,
    host: &str,
    port: u16,
    transport: Arc<MemoryTransport>,
    neighbours: Vec<String>,
    storage_root: std::path::PathBuf,
    sync_interval_ms: u64,
) -> Arc<Node> {
    let catalog = Arc::new(JsonFileAppCatalog::load(&storage_root).await);
    let config = NodeConfig {
        node_name: name.to_string(),
        neighbours,
        host: host.to_string(),
        port,
        storage_root,
        sync_interval_ms,
        ..NodeConfig::default()
    };
    let node = Node::new(
        config,
        transport as Arc<dyn Transport>,
        Arc::new(SysinfoStatsSource::new()) as Arc<dyn StatsSource>,
        catalog,
        Arc::new(DefaultProcessLauncher::new()),
        Arc::new(SystemClock) as Arc<dyn Clock>,
    );
    node.start_node().await.expect("node failed to start");
    node
}

async fn recv_reply(receiver: &mut Box<dyn TransportReceiver>) -> Message {
    loop {
        match receiver.recv().await.expect("transport closed before a reply arrived") {
            TransportEvent::Data(bytes) => {
                let text = String::from_utf8(bytes).unwrap();
                return Message::deserialize(&text).unwrap();
            }
            TransportEvent::Opened | TransportEvent::Closed(_, _) => continue,
        }
    }
}

// Scenario 1: apps command against an empty catalog replies `error=null,
// reply={}`.
#[tokio::test]
async fn apps_command_on_empty_catalog_returns_empty_object() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = tempfile::tempdir().unwrap();
    let node = spawn_node(
        "a",
        "127.0.0.1",
        17001,
        transport.clone(),
        vec![],
        storage.path().to_path_buf(),
        10_000,
    )
    .await;

    let (sender, mut receiver) = transport.connect("ws://127.0.0.1:17001").await.unwrap();
    let request = Message::command("apps", serde_json::json!({}));
    sender.send(request.serialize().unwrap().into_bytes()).await.unwrap();

    let reply = recv_reply(&mut receiver).await;
    assert_eq!(reply.data["error"], serde_json::Value::Null);
    assert_eq!(reply.data["reply"], serde_json::json!({}));

    node.shutdown().await;
}

// Scenario 2 (partial: one direction of convergence): B bootstraps with A as
// a neighbour, so B knows A immediately; after B's first gossip tick, A
// learns about B too.
#[tokio::test]
async fn two_node_gossip_converges_after_one_tick() {
    let transport = Arc::new(MemoryTransport::new());
    let storage_a = tempfile::tempdir().unwrap();
    let storage_b = tempfile::tempdir().unwrap();

    let node_a = spawn_node(
        "a",
        "127.0.0.1",
        17002,
        transport.clone(),
        vec![],
        storage_a.path().to_path_buf(),
        150,
    )
    .await;
    let node_b = spawn_node(
        "b",
        "127.0.0.1",
        17003,
        transport.clone(),
        vec!["a:ws://127.0.0.1:17002".to_string()],
        storage_b.path().to_path_buf(),
        150,
    )
    .await;

    assert!(node_b.sync_manager().known_nodes().iter().any(|n| n.name == "a"));

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(
        node_a.sync_manager().known_nodes().iter().any(|n| n.name == "b"),
        "A should have learned about B from B's first gossip tick"
    );

    node_a.shutdown().await;
    node_b.shutdown().await;
}

// Scenario 4: submitting a LocalProcess task replies immediately with a
// task-id; a later task-result command returns the captured stdout.
#[tokio::test]
async fn process_task_then_task_result_returns_captured_stdout() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = tempfile::tempdir().unwrap();
    let node = spawn_node(
        "a",
        "127.0.0.1",
        17004,
        transport.clone(),
        vec![],
        storage.path().to_path_buf(),
        10_000,
    )
    .await;

    let (sender, mut receiver) = transport.connect("ws://127.0.0.1:17004").await.unwrap();

    let process = serde_json::json!({ "executable": "/bin/echo", "args": ["hi"] });
    let submit = Message::task_submit(ProcessType::LocalProcess, process, Some(10_000))
        .set_header(header::CONSUME_OUT, "true");
    sender.send(submit.serialize().unwrap().into_bytes()).await.unwrap();

    let submit_reply = recv_reply(&mut receiver).await;
    assert_eq!(submit_reply.data["error"], serde_json::Value::Null);
    let task_id = submit_reply.data["reply"]["task-id"]
        .as_str()
        .expect("reply carries a task-id")
        .to_string();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let result_req = Message::command("task-result", serde_json::json!({ "task-id": task_id }));
    sender.send(result_req.serialize().unwrap().into_bytes()).await.unwrap();

    let result_reply = recv_reply(&mut receiver).await;
    assert_eq!(result_reply.data["error"], serde_json::Value::Null);
    assert_eq!(result_reply.data["reply"], serde_json::json!("hi\n"));

    node.shutdown().await;
}

// Scenario 1 variant: run-app against an unknown app surfaces "No such app".
#[tokio::test]
async fn run_app_for_unknown_app_surfaces_an_error() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = tempfile::tempdir().unwrap();
    let node = spawn_node(
        "a",
        "127.0.0.1",
        17005,
        transport.clone(),
        vec![],
        storage.path().to_path_buf(),
        10_000,
    )
    .await;

    let (sender, mut receiver) = transport.connect("ws://127.0.0.1:17005").await.unwrap();
    let request = Message::command("run-app", serde_json::json!({ "app": "does-not-exist" }));
    sender.send(request.serialize().unwrap().into_bytes()).await.unwrap();

    let reply = recv_reply(&mut receiver).await;
    let error = reply.data["error"].as_str().expect("error message present");
    assert!(error.contains("No such app"));

    node.shutdown().await;
}
