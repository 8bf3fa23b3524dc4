use std::fmt;
use std::time::{Duration, SystemTime};

/// Handle returned by `Clock::schedule`; dropping it does not cancel the
/// timer, only calling `cancel()` does (mirrors `troup/threading.py`'s
/// `IntervalTimer.cancel()` being an explicit call, not a destructor).
pub struct CancelHandle {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl CancelHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(&self) {
        (self.cancel)()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

/// Port onto wall-clock time and interval scheduling, so that `SyncManager`
/// and `RequestTracker` can be driven by a fake clock in tests instead of
/// real `tokio::time` sleeps (`spec.md` §1, §9).
///
/// `schedule` re-arms the interval only after the callback returns, matching
/// `troup/threading.py`'s `IntervalTimer` (a naive fixed-period timer would
/// let a slow callback overlap itself).
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    fn schedule(&self, interval: Duration, f: Box<dyn Fn() + Send + Sync>) -> CancelHandle;
}
