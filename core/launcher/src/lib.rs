//! Default `ProcessLauncher`: `tokio::process::Command` for `LocalProcess`,
//! an `ssh` argv wrapper for `SSHProcess` (`spec.md` §4.4).

use async_trait::async_trait;
use cohort_interfaces::{LaunchError, ProcessHandle, ProcessLauncher, ProcessSpec};
use cohort_types::ProcessType;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::debug;

pub struct TokioProcessHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn wait(&mut self) -> Result<i32, LaunchError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) -> Result<(), LaunchError> {
        self.child.kill().await.map_err(LaunchError::from)
    }
}

/// Builds either a direct local command or an `ssh` wrapper around the
/// same executable/args, per `ProcessSpec::process_type`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProcessLauncher;

impl DefaultProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    fn build(spec: &ProcessSpec) -> Command {
        match spec.process_type {
            ProcessType::LocalProcess => {
                let mut cmd = Command::new(&spec.executable);
                cmd.args(&spec.args);
                if let Some(dir) = &spec.directory {
                    cmd.current_dir(dir);
                }
                cmd
            }
            ProcessType::SSHProcess => {
                let ssh = spec.ssh.as_ref().expect("SSHProcess spec carries an ssh target");
                let mut cmd = Command::new("ssh");
                if ssh.forward_video {
                    cmd.arg("-Y");
                }
                if ssh.compress_stream {
                    cmd.arg("-C");
                }
                cmd.arg("-f")
                    .arg("-p")
                    .arg(ssh.port.to_string())
                    .arg(format!("{}@{}", ssh.user, ssh.host));
                let mut remote = spec.executable.clone();
                for arg in &spec.args {
                    remote.push(' ');
                    remote.push_str(arg);
                }
                cmd.arg(remote);
                cmd
            }
        }
    }
}

#[async_trait]
impl ProcessLauncher for DefaultProcessLauncher {
    async fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let mut cmd = Self::build(&spec);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        debug!(executable = %spec.executable, "spawning process");
        let child = cmd.spawn().map_err(|e| LaunchError::Spawn(e.to_string()))?;
        Ok(Box::new(TokioProcessHandle { child }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn local_process_captures_stdout() {
        let launcher = DefaultProcessLauncher::new();
        let spec = ProcessSpec {
            process_type: ProcessType::LocalProcess,
            executable: "/bin/echo".to_string(),
            args: vec!["hi".to_string()],
            directory: None,
            ssh: None,
        };
        let mut handle = launcher.spawn(spec).await.unwrap();
        let mut out = String::new();
        handle.stdout().unwrap().read_to_string(&mut out).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), 0);
        assert_eq!(out, "hi\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_via_wait() {
        let launcher = DefaultProcessLauncher::new();
        let spec = ProcessSpec {
            process_type: ProcessType::LocalProcess,
            executable: "/bin/false".to_string(),
            args: vec![],
            directory: None,
            ssh: None,
        };
        let mut handle = launcher.spawn(spec).await.unwrap();
        assert_ne!(handle.wait().await.unwrap(), 0);
    }
}
