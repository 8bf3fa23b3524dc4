use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cohort_clock::IntervalTimer;
use cohort_interfaces::{Clock, LaunchError};
use cohort_types::{TaskRunnerStats, TaskStatus, TaskSummary};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::warn;

use crate::process_task::RunnableTask;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} is already running")]
    AlreadyRunning(String),
    #[error("no such task: {0}")]
    NotFound(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error(transparent)]
    Process(#[from] LaunchError),
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct TaskRunState {
    status: TaskStatus,
    started_at_ms: Option<u64>,
    result: Option<String>,
    error: Option<String>,
}

/// `CREATED -> RUNNING -> STOPPING -> {DONE, ERROR}`; a run never leaves
/// `DONE`/`ERROR` (`spec.md` §3, §4.4).
pub struct TaskRun {
    id: String,
    ttl_ms: u64,
    state: Mutex<TaskRunState>,
    task: tokio::sync::Mutex<Box<dyn RunnableTask>>,
    finished: Notify,
    is_terminal: AtomicBool,
}

impl TaskRun {
    fn new(id: String, ttl_ms: u64, task: Box<dyn RunnableTask>) -> Arc<Self> {
        Arc::new(Self {
            id,
            ttl_ms,
            state: Mutex::new(TaskRunState {
                status: TaskStatus::Created,
                started_at_ms: None,
                result: None,
                error: None,
            }),
            task: tokio::sync::Mutex::new(task),
            finished: Notify::new(),
            is_terminal: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn result(&self) -> Option<String> {
        let state = self.state.lock();
        (state.status == TaskStatus::Done).then(|| state.result.clone()).flatten()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn started_at_ms(&self) -> Option<u64> {
        self.state.lock().started_at_ms
    }

    fn is_done_with_expired_ttl(&self, now: u64) -> bool {
        let state = self.state.lock();
        if !state.status.is_terminal() {
            return false;
        }
        if self.ttl_ms == 0 {
            return true;
        }
        match state.started_at_ms {
            Some(started) => now.saturating_sub(started) > self.ttl_ms,
            None => true,
        }
    }

    /// Runs on a worker once a pool permit is acquired: sets `RUNNING`,
    /// invokes the task, and on normal return self-stops through
    /// `STOPPING -> DONE`. Any error from `run()` goes straight to `ERROR`.
    async fn execute(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.status = TaskStatus::Running;
            state.started_at_ms = Some(now_ms());
        }

        let outcome = self.task.lock().await.run().await;

        match outcome {
            Ok(result) => {
                self.state.lock().status = TaskStatus::Stopping;
                self.task.lock().await.stop(None).await;
                let mut state = self.state.lock();
                state.status = TaskStatus::Done;
                state.result = Some(result);
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.status = TaskStatus::Error;
                state.error = Some(e.to_string());
            }
        }

        self.is_terminal.store(true, Ordering::Release);
        self.finished.notify_waiters();
    }

    /// Asks a `RUNNING` task to stop cooperatively; a no-op error for any
    /// other status, matching the source's `TaskRun.stop` guard.
    async fn request_stop(&self, reason: Option<String>) -> Result<(), TaskError> {
        if self.state.lock().status != TaskStatus::Running {
            return Err(TaskError::InvalidTransition(format!(
                "task {} is not running",
                self.id
            )));
        }
        self.task.lock().await.stop(reason).await;
        Ok(())
    }

    async fn wait_finished(&self, timeout: Option<Duration>) {
        if self.is_terminal.load(Ordering::Acquire) {
            return;
        }
        let notified = self.finished.notified();
        match timeout {
            Some(d) => {
                let _ = tokio::time::timeout(d, notified).await;
            }
            None => notified.await,
        }
    }
}

/// A bounded worker pool over `TaskRun`s (`spec.md` §4.4), keyed by task id.
pub struct TaskRunner {
    tasks: DashMap<String, Arc<TaskRun>>,
    semaphore: Arc<Semaphore>,
    sweep: IntervalTimer,
}

impl TaskRunner {
    pub fn new(max_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            tasks: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            sweep: IntervalTimer::new("task-runner-sweep", Duration::from_millis(1000), Duration::ZERO),
        })
    }

    pub fn start_sweeper(self: &Arc<Self>, clock: Arc<dyn Clock>) {
        let this = self.clone();
        self.sweep.start(clock, Box::new(move || this.sweep_once()));
    }

    fn sweep_once(&self) {
        let now = now_ms();
        let expired: Vec<String> = self
            .tasks
            .iter()
            .filter(|e| e.value().is_done_with_expired_ttl(now))
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            self.tasks.remove(&id);
        }
    }

    /// Rejects a task id already present; otherwise creates the `TaskRun`,
    /// registers it, and schedules it on the pool behind a semaphore
    /// permit. Returns immediately; the caller polls status/result later.
    pub fn run(self: &Arc<Self>, id: String, ttl_ms: u64, task: Box<dyn RunnableTask>) -> Result<Arc<TaskRun>, TaskError> {
        if self.tasks.contains_key(&id) {
            return Err(TaskError::AlreadyRunning(id));
        }
        let run = TaskRun::new(id.clone(), ttl_ms, task);
        self.tasks.insert(id, run.clone());

        let semaphore = self.semaphore.clone();
        let worker_run = run.clone();
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            worker_run.execute().await;
            drop(permit);
        });

        Ok(run)
    }

    pub fn get(&self, id: &str) -> Option<Arc<TaskRun>> {
        self.tasks.get(id).map(|e| e.value().clone())
    }

    /// Stops a running task; optionally blocks until the worker finishes or
    /// `timeout` elapses. Removes the entry either way once present.
    pub async fn stop(&self, id: &str, wait: bool, timeout: Option<Duration>) -> Result<(), TaskError> {
        let Some(run) = self.tasks.get(id).map(|e| e.value().clone()) else {
            return Err(TaskError::NotFound(id.to_string()));
        };
        if run.status() == TaskStatus::Running {
            if let Err(e) = run.request_stop(None).await {
                warn!(task = id, error = %e, "stop request rejected");
            }
            if wait {
                run.wait_finished(timeout).await;
            }
        }
        self.tasks.remove(id);
        Ok(())
    }

    pub fn stats(&self) -> TaskRunnerStats {
        let tasks: Vec<TaskSummary> = self
            .tasks
            .iter()
            .map(|e| TaskSummary {
                id: e.key().clone(),
                status: e.value().status(),
                started_at_ms: e.value().started_at_ms(),
            })
            .collect();
        let running = tasks.iter().filter(|t| t.status == TaskStatus::Running).count();
        TaskRunnerStats {
            total: tasks.len(),
            running,
            tasks,
        }
    }

    /// Cancels the sweeper, asks every running task to stop, and waits for
    /// the pool to drain.
    pub async fn shutdown(&self) {
        self.sweep.cancel();
        let ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            if let Some(run) = self.tasks.get(id).map(|e| e.value().clone()) {
                if run.status() == TaskStatus::Running {
                    let _ = run.request_stop(None).await;
                    run.wait_finished(Some(Duration::from_secs(5))).await;
                }
            }
        }
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cohort_clock::SystemClock;
    use std::sync::atomic::AtomicUsize;

    struct Immediate(Result<String, TaskError>);

    #[async_trait]
    impl RunnableTask for Immediate {
        async fn run(&mut self) -> Result<String, TaskError> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(TaskError::NotFound("boom".into())),
            }
        }
        async fn stop(&mut self, _reason: Option<String>) {}
    }

    struct Blocked {
        stop_rx: Option<tokio::sync::oneshot::Receiver<()>>,
        stop_tx: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
    }

    #[async_trait]
    impl RunnableTask for Blocked {
        async fn run(&mut self) -> Result<String, TaskError> {
            let rx = self.stop_rx.take().unwrap();
            let _ = rx.await;
            Ok("stopped".to_string())
        }
        async fn stop(&mut self, _reason: Option<String>) {
            if let Some(tx) = self.stop_tx.lock().take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn run_completes_and_reports_result() {
        let runner = TaskRunner::new(2);
        let run = runner
            .run("t1".into(), 0, Box::new(Immediate(Ok("done".into()))))
            .unwrap();
        run.wait_finished(Some(Duration::from_secs(1))).await;
        assert_eq!(run.status(), TaskStatus::Done);
        assert_eq!(run.result().unwrap(), "done");
    }

    #[tokio::test]
    async fn run_failure_transitions_to_error() {
        let runner = TaskRunner::new(2);
        let run = runner
            .run("t2".into(), 0, Box::new(Immediate(Err(TaskError::NotFound("x".into())))))
            .unwrap();
        run.wait_finished(Some(Duration::from_secs(1))).await;
        assert_eq!(run.status(), TaskStatus::Error);
        assert!(run.error().is_some());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let runner = TaskRunner::new(2);
        runner.run("dup".into(), 0, Box::new(Immediate(Ok("a".into())))).unwrap();
        let second = runner.run("dup".into(), 0, Box::new(Immediate(Ok("b".into()))));
        assert!(matches!(second, Err(TaskError::AlreadyRunning(_))));
    }

    #[tokio::test]
    async fn external_stop_wakes_a_blocked_task() {
        let runner = TaskRunner::new(2);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let stop_tx = Arc::new(Mutex::new(Some(tx)));
        let run = runner
            .run(
                "blocked".into(),
                0,
                Box::new(Blocked {
                    stop_rx: Some(rx),
                    stop_tx,
                }),
            )
            .unwrap();
        tokio::task::yield_now().await;
        runner.stop("blocked", true, Some(Duration::from_secs(1))).await.unwrap();
        assert!(run.status().is_terminal());
    }

    #[tokio::test]
    async fn stats_reports_counts_by_status() {
        let runner = TaskRunner::new(2);
        let run = runner
            .run("s1".into(), 0, Box::new(Immediate(Ok("a".into()))))
            .unwrap();
        run.wait_finished(Some(Duration::from_secs(1))).await;
        let stats = runner.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_zero_ttl_done_entries() {
        let runner = TaskRunner::new(2);
        runner.start_sweeper(Arc::new(SystemClock));
        let run = runner
            .run("zero-ttl".into(), 0, Box::new(Immediate(Ok("a".into()))))
            .unwrap();
        run.wait_finished(Some(Duration::from_secs(1))).await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        assert!(runner.get("zero-ttl").is_none());
    }

    #[allow(dead_code)]
    fn unused(_: AtomicUsize) {}
}
