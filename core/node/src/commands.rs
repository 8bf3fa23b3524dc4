//! Command-table handlers (`spec.md` §4.7). Each returns `anyhow::Result`;
//! the dispatcher catches the error and turns it into a reply's
//! `data.error`, mirroring the source's blanket `except Exception`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cohort_interfaces::{ProcessLauncher, ProcessSpec, SshTarget};
use cohort_ranking::RankingEngine;
use cohort_tasks::ProcessTask;
use cohort_types::{ClusterApp, Message, NodeInfo, ProcessType};
use serde_json::Value;
use uuid::Uuid;

use crate::Node;

fn parse_endpoint_host(endpoint: &str) -> Option<String> {
    let without_scheme = endpoint.split("://").nth(1).unwrap_or(endpoint);
    without_scheme.split(':').next().map(|s| s.to_string())
}

impl Node {
    pub(crate) async fn dispatch_command(self: &Arc<Self>, msg: &Message) -> Result<Value> {
        match msg.command_name() {
            Some("apps") => self.cmd_apps().await,
            Some("info") => self.cmd_info().await,
            Some("run-app") => self.cmd_run_app(msg).await,
            Some("task-result") => self.cmd_task_result(msg),
            Some(other) => Err(anyhow!("unknown command: {other}")),
            None => Err(anyhow!("command message missing a command header")),
        }
    }

    /// Merges the local catalog with every known peer's advertised `apps`,
    /// keyed by app name, each entry listing every node that declared it.
    async fn cmd_apps(self: &Arc<Self>) -> Result<Value> {
        let mut merged: HashMap<String, ClusterApp> = HashMap::new();
        for descriptor in self.catalog.list().await {
            merged.insert(
                descriptor.name.clone(),
                ClusterApp {
                    nodes: vec![self.config.node_name.clone()],
                    descriptor,
                },
            );
        }
        for peer in self.sync.known_nodes() {
            for descriptor in &peer.apps {
                merged
                    .entry(descriptor.name.clone())
                    .and_modify(|e| e.nodes.push(peer.name.clone()))
                    .or_insert_with(|| ClusterApp {
                        descriptor: descriptor.clone(),
                        nodes: vec![peer.name.clone()],
                    });
            }
        }
        Ok(serde_json::to_value(merged)?)
    }

    async fn cmd_info(self: &Arc<Self>) -> Result<Value> {
        Ok(serde_json::to_value(self.build_node_info().await)?)
    }

    /// Locates the named app across self and known peers, ranks the nodes
    /// that declared it, and submits the winner to the local `TaskRunner`
    /// — locally if the winner is this node, over SSH otherwise.
    async fn cmd_run_app(self: &Arc<Self>, msg: &Message) -> Result<Value> {
        let app_name = msg
            .data
            .get("app")
            .and_then(|v| v.as_str())
            .context("run-app requires data.app")?;

        let app_from_self = self.catalog.find(app_name).await;
        let mut candidates: Vec<NodeInfo> = Vec::new();
        if app_from_self.is_some() {
            candidates.push(self.build_node_info().await);
        }
        for peer in self.sync.known_nodes() {
            if peer.apps.iter().any(|a| a.name == app_name) {
                candidates.push(peer);
            }
        }
        if candidates.is_empty() {
            return Err(anyhow!("No such app: {app_name}"));
        }
        let descriptor = app_from_self
            .or_else(|| {
                candidates
                    .iter()
                    .flat_map(|n| n.apps.iter())
                    .find(|a| a.name == app_name)
                    .cloned()
            })
            .context("app disappeared mid-lookup")?;
        let needs = descriptor.needs;

        let ranked = RankingEngine::new().rank(&needs, &candidates);
        let winner = ranked.first().context("no ranked candidate")?;

        let spec = if winner.name == self.config.node_name {
            ProcessSpec {
                process_type: ProcessType::LocalProcess,
                executable: descriptor.command.clone(),
                args: descriptor.params.clone(),
                directory: None,
                ssh: None,
            }
        } else {
            let host = parse_endpoint_host(&winner.endpoint)
                .context("could not parse peer endpoint host")?;
            ProcessSpec {
                process_type: ProcessType::SSHProcess,
                executable: descriptor.command.clone(),
                args: descriptor.params.clone(),
                directory: None,
                ssh: Some(SshTarget {
                    host,
                    port: winner.ssh_port(),
                    user: self.config.ssh_user.clone(),
                    forward_video: false,
                    compress_stream: false,
                }),
            }
        };

        let task_id = Uuid::new_v4().to_string();
        let task = ProcessTask::new(self.launcher.clone(), spec, true, self.config.process_buffer_size);
        self.task_runner
            .run(task_id.clone(), 60_000, Box::new(task))
            .map_err(|e| anyhow!("{e}"))?;

        Ok(serde_json::json!({ "task-id": task_id }))
    }

    fn cmd_task_result(self: &Arc<Self>, msg: &Message) -> Result<Value> {
        let task_id = msg
            .data
            .get("task-id")
            .and_then(|v| v.as_str())
            .context("task-result requires data.task-id")?;
        let run = self
            .task_runner
            .get(task_id)
            .ok_or_else(|| anyhow!("No such task: {task_id}"))?;
        if run.status() == cohort_types::TaskStatus::Done {
            Ok(Value::String(run.result().unwrap_or_default()))
        } else {
            Ok(Value::Null)
        }
    }

    /// Builds a `ProcessTask` (always `LocalProcess`; `spec.md` §4.7's "the
    /// `process` task builder") from a `type=task` message and submits it.
    pub(crate) async fn dispatch_task(self: &Arc<Self>, msg: &Message) -> Result<Value> {
        let process = msg
            .data
            .get("process")
            .context("task message missing data.process")?;
        let executable = process
            .get("executable")
            .and_then(|v| v.as_str())
            .context("task process missing executable")?
            .to_string();
        let args: Vec<String> = process
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let directory = process
            .get("directory")
            .and_then(|v| v.as_str())
            .map(String::from);

        let process_type = msg.process_type().unwrap_or(ProcessType::LocalProcess);
        let ssh = if process_type == ProcessType::SSHProcess {
            let ssh_value = process.get("ssh").context("SSHProcess task missing data.process.ssh")?;
            Some(SshTarget {
                host: ssh_value
                    .get("host")
                    .and_then(|v| v.as_str())
                    .context("ssh target missing host")?
                    .to_string(),
                port: ssh_value.get("port").and_then(|v| v.as_u64()).unwrap_or(22) as u16,
                user: ssh_value
                    .get("user")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&self.config.ssh_user)
                    .to_string(),
                forward_video: ssh_value.get("forward-video").and_then(|v| v.as_bool()).unwrap_or(false),
                compress_stream: ssh_value.get("compress-stream").and_then(|v| v.as_bool()).unwrap_or(false),
            })
        } else {
            None
        };

        let spec = ProcessSpec {
            process_type,
            executable,
            args,
            directory,
            ssh,
        };
        let consume_out = msg.consume_out();
        let buffer_size = msg.buffer_size().unwrap_or(self.config.process_buffer_size);
        let ttl_ms = msg.ttl_ms().unwrap_or(0);

        let task_id = Uuid::new_v4().to_string();
        let task = ProcessTask::new(self.launcher.clone(), spec, consume_out, buffer_size);
        self.task_runner
            .run(task_id.clone(), ttl_ms, Box::new(task))
            .map_err(|e| anyhow!("{e}"))?;

        Ok(serde_json::json!({ "task-id": task_id }))
    }
}
