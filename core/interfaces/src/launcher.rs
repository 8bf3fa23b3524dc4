use async_trait::async_trait;
use cohort_types::ProcessType;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("process exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The optional SSH target for a `SSHProcess` task, mirroring
/// `node_info.extra["ssh"]["port"]` (`spec.md` §9; default port 22).
/// `forward_video`/`compress_stream` map to `ssh -Y`/`ssh -C`.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub forward_video: bool,
    pub compress_stream: bool,
}

/// What to spawn, as decoded from a `task` message's `data.process`.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub process_type: ProcessType,
    pub executable: String,
    pub args: Vec<String>,
    pub directory: Option<String>,
    pub ssh: Option<SshTarget>,
}

/// A running or exited OS process, as returned by `ProcessLauncher::spawn`.
#[async_trait]
pub trait ProcessHandle: Send {
    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    async fn wait(&mut self) -> Result<i32, LaunchError>;
    async fn kill(&mut self) -> Result<(), LaunchError>;
}

/// Port onto subprocess/SSH spawning mechanics, treated as an external
/// collaborator per `spec.md` §1.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}
