//! Default `Clock` adapter plus the `IntervalTimer` convenience wrapper used
//! by `SyncManager` and `RequestTracker` to run their periodic sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cohort_interfaces::{CancelHandle, Clock};

/// `Clock` backed by the real OS clock and `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Re-arms the next tick before running the callback: the sleep loop
    /// never waits on the callback, so a slow target cannot drift the
    /// schedule (`troup/threading.py`'s `IntervalTimer._run_`).
    fn schedule(&self, interval: Duration, f: Box<dyn Fn() + Send + Sync>) -> CancelHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let f = Arc::new(f);
        let loop_cancelled = cancelled.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if loop_cancelled.load(Ordering::Acquire) {
                    return;
                }
                let f = f.clone();
                tokio::spawn(async move { f() });
            }
        });
        CancelHandle::new(move || cancelled.store(true, Ordering::Release))
    }
}

/// A named, cancellable periodic action with an optional first-run offset,
/// mirroring `troup/threading.py`'s `IntervalTimer` class. `target` runs on
/// a detached task each tick; `cancel` prevents the *next* tick but does not
/// interrupt a target already in flight (`spec.md` §5).
pub struct IntervalTimer {
    name: String,
    interval: Duration,
    offset: Duration,
    handle: parking_lot::Mutex<Option<CancelHandle>>,
}

impl IntervalTimer {
    pub fn new(name: impl Into<String>, interval: Duration, offset: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            offset,
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Arms the timer on `clock`. A no-op if already running, matching the
    /// source's `start()` guard.
    pub fn start(&self, clock: Arc<dyn Clock>, target: Box<dyn Fn() + Send + Sync>) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        let offset = self.offset;
        let interval = self.interval;
        if offset.is_zero() {
            *guard = Some(clock.schedule(interval, target));
        } else {
            let target: Arc<dyn Fn() + Send + Sync> = Arc::from(target);
            let first_shot = target.clone();
            tokio::spawn(async move {
                tokio::time::sleep(offset).await;
                first_shot();
            });
            *guard = Some(clock.schedule(interval, Box::new(move || target())));
        }
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn system_clock_schedule_fires_repeatedly() {
        let clock = SystemClock;
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = clock.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timer_is_idempotent_on_double_start() {
        let timer = IntervalTimer::new("test", Duration::from_millis(50), Duration::ZERO);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        timer.start(clock.clone(), Box::new(|| {}));
        assert!(timer.is_running());
        timer.start(clock, Box::new(|| {}));
        assert!(timer.is_running());
        timer.cancel();
        assert!(!timer.is_running());
    }
}
