use std::sync::Arc;

use async_trait::async_trait;
use cohort_interfaces::{LaunchError, ProcessLauncher, ProcessSpec};
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;

use crate::ring_buffer::RingBuffer;
use crate::TaskError;

/// What a `TaskRun` drives: `run()` executes the work and resolves to a
/// result payload or error, `stop()` asks an in-flight run to wind down
/// cooperatively (`spec.md` §4.4).
#[async_trait]
pub trait RunnableTask: Send {
    async fn run(&mut self) -> Result<String, TaskError>;
    async fn stop(&mut self, reason: Option<String>);
}

/// Spawns one process via a `ProcessLauncher` and captures its output.
/// `LocalProcessTask`/`SSHProcessTask` are both this type, distinguished
/// only by `ProcessSpec::process_type` — the launcher already owns the
/// local-vs-ssh argv construction, so there is no behavior left to split
/// across two Rust types.
pub struct ProcessTask {
    launcher: Arc<dyn ProcessLauncher>,
    spec: ProcessSpec,
    consume_out: bool,
    stdout: Arc<SyncMutex<RingBuffer<String>>>,
    stderr: Arc<SyncMutex<RingBuffer<String>>>,
    stop_tx: SyncMutex<Option<oneshot::Sender<()>>>,
}

impl ProcessTask {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        spec: ProcessSpec,
        consume_out: bool,
        buffer_size: usize,
    ) -> Self {
        Self {
            launcher,
            spec,
            consume_out,
            stdout: Arc::new(SyncMutex::new(RingBuffer::new(buffer_size))),
            stderr: Arc::new(SyncMutex::new(RingBuffer::new(buffer_size))),
            stop_tx: SyncMutex::new(None),
        }
    }

    fn spawn_line_reader(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        sink: Arc<SyncMutex<RingBuffer<String>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.lock().push(line);
            }
        })
    }
}

#[async_trait]
impl RunnableTask for ProcessTask {
    /// Spawns the process; races its natural exit against a cooperative
    /// stop signal so `stop()` can interrupt a run already in flight
    /// without the two halves fighting over exclusive access to the child.
    async fn run(&mut self) -> Result<String, TaskError> {
        let mut handle = self
            .launcher
            .spawn(self.spec.clone())
            .await
            .map_err(TaskError::Process)?;

        let mut readers = Vec::new();
        if self.consume_out {
            if let Some(out) = handle.stdout() {
                readers.push(Self::spawn_line_reader(out, self.stdout.clone()));
            }
            if let Some(err) = handle.stderr() {
                readers.push(Self::spawn_line_reader(err, self.stderr.clone()));
            }
        }

        let (tx, mut rx) = oneshot::channel();
        *self.stop_tx.lock() = Some(tx);

        let code = tokio::select! {
            result = handle.wait() => result.map_err(TaskError::Process)?,
            _ = &mut rx => {
                let _ = handle.kill().await;
                handle.wait().await.unwrap_or(-1)
            }
        };
        *self.stop_tx.lock() = None;

        for reader in readers {
            let _ = reader.await;
        }

        if code == 0 {
            Ok(self.stdout.lock().joined())
        } else {
            Err(TaskError::Process(LaunchError::NonZeroExit {
                code,
                stderr: self.stderr.lock().joined(),
            }))
        }
    }

    async fn stop(&mut self, _reason: Option<String>) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}
