use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::TrackerError;

/// Single-completion awaitable (`spec.md` §3's `CallbackWrapper.promise`,
/// §8's "resolves at most once"/"blocks until complete"/"concurrent
/// observers see the same outcome"). Backed by a `Notify`-guarded cell
/// rather than a `oneshot::Receiver` because the timeout sweep and an
/// incoming reply race to complete the same promise while client code
/// independently awaits it — multiple observers, not one.
pub struct Promise<T> {
    outcome: Mutex<Option<Result<T, TrackerError>>>,
    notify: Notify,
}

impl<T: Clone> Promise<T> {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// No-op if already completed — a Promise resolves at most once.
    pub fn complete(&self, outcome: Result<T, TrackerError>) {
        let mut guard = self.outcome.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(outcome);
        drop(guard);
        self.notify.notify_waiters();
    }

    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    pub async fn result(&self) -> Result<T, TrackerError> {
        loop {
            let notified = self.notify.notified();
            if let Some(outcome) = self.outcome.lock().clone() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn result_blocks_until_complete() {
        let promise: Arc<Promise<u32>> = Arc::new(Promise::new());
        let p2 = promise.clone();
        let waiter = tokio::spawn(async move { p2.result().await });
        tokio::task::yield_now().await;
        promise.complete(Ok(42));
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn second_complete_call_is_ignored() {
        let promise: Promise<u32> = Promise::new();
        promise.complete(Ok(1));
        promise.complete(Ok(2));
        assert_eq!(promise.result().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_observers_see_the_same_outcome() {
        let promise: Arc<Promise<u32>> = Arc::new(Promise::new());
        let a = promise.clone();
        let b = promise.clone();
        let wa = tokio::spawn(async move { a.result().await });
        let wb = tokio::spawn(async move { b.result().await });
        tokio::task::yield_now().await;
        promise.complete(Ok(7));
        assert_eq!(wa.await.unwrap().unwrap(), 7);
        assert_eq!(wb.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn error_completion_surfaces_as_err() {
        let promise: Promise<u32> = Promise::new();
        promise.complete(Err(TrackerError::Timeout));
        assert!(matches!(promise.result().await, Err(TrackerError::Timeout)));
    }
}
