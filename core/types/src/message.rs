use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved header names used by the wire protocol (`spec.md` §3).
pub mod header {
    pub const TYPE: &str = "type";
    pub const COMMAND: &str = "command";
    pub const TASK_TYPE: &str = "task-type";
    pub const PROCESS_TYPE: &str = "process-type";
    pub const TTL: &str = "ttl";
    pub const REPLY_FOR: &str = "reply-for";
    pub const CONSUME_OUT: &str = "consume-out";
    pub const BUFFER_SIZE: &str = "buffer-size";
}

/// The four values `headers.type` may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Command,
    Task,
    Reply,
    SyncMessage,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Command => "command",
            MessageType::Task => "task",
            MessageType::Reply => "reply",
            MessageType::SyncMessage => "sync-message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command" => Some(MessageType::Command),
            "task" => Some(MessageType::Task),
            "reply" => Some(MessageType::Reply),
            "sync-message" => Some(MessageType::SyncMessage),
            _ => None,
        }
    }
}

/// `ProcessDescriptor.process-type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessType {
    LocalProcess,
    SSHProcess,
}

impl ProcessType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LocalProcess" => Some(ProcessType::LocalProcess),
            "SSHProcess" => Some(ProcessType::SSHProcess),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessType::LocalProcess => "LocalProcess",
            ProcessType::SSHProcess => "SSHProcess",
        }
    }
}

/// The typed envelope `{id, headers, data}` carried over the wire.
///
/// Every `Message` has a non-empty `id`; a reply always carries
/// `type=reply` and `reply-for` (see `Message::reply_to`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub headers: HashMap<String, Option<String>>,
    #[serde(default = "Value::default")]
    pub data: Value,
}

impl Message {
    pub fn new(data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            headers: HashMap::new(),
            data,
        }
    }

    pub fn with_id(id: impl Into<String>, data: Value) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "Message id must not be empty");
        Self {
            id,
            headers: HashMap::new(),
            data,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.as_deref())
    }

    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), Some(value.into()));
        self
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.header(header::TYPE).and_then(MessageType::parse)
    }

    pub fn command_name(&self) -> Option<&str> {
        self.header(header::COMMAND)
    }

    pub fn ttl_ms(&self) -> Option<u64> {
        self.header(header::TTL).and_then(|v| v.parse().ok())
    }

    pub fn reply_for(&self) -> Option<&str> {
        self.header(header::REPLY_FOR)
    }

    pub fn process_type(&self) -> Option<ProcessType> {
        self.header(header::PROCESS_TYPE).and_then(ProcessType::parse)
    }

    pub fn consume_out(&self) -> bool {
        self.header(header::CONSUME_OUT)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn buffer_size(&self) -> Option<usize> {
        self.header(header::BUFFER_SIZE).and_then(|v| v.parse().ok())
    }

    /// Build a `{type=command, command=<name>}` request, as
    /// `CommandAPI.command` does in the original client.
    pub fn command(name: impl Into<String>, data: Value) -> Self {
        Message::new(data)
            .set_header(header::TYPE, MessageType::Command.as_str())
            .set_header(header::COMMAND, name)
    }

    /// Build a `{type=task, task-type=process, process-type=<kind>}`
    /// submission, as `CommandAPI.task` does in the original client.
    pub fn task_submit(process_type: ProcessType, process: Value, ttl_ms: Option<u64>) -> Self {
        let mut msg = Message::new(serde_json::json!({ "process": process }))
            .set_header(header::TYPE, MessageType::Task.as_str())
            .set_header(header::TASK_TYPE, "process")
            .set_header(header::PROCESS_TYPE, process_type.as_str());
        if let Some(ttl) = ttl_ms {
            msg = msg.set_header(header::TTL, ttl.to_string());
        }
        msg
    }

    /// Build a reply to `request`, carrying `type=reply, reply-for=<id>`.
    pub fn reply_to(request: &Message, reply: Value, error: Option<String>) -> Self {
        Message::new(serde_json::json!({ "reply": reply, "error": error }))
            .set_header(header::TYPE, MessageType::Reply.as_str())
            .set_header(header::REPLY_FOR, request.id.clone())
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn deserialize(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
