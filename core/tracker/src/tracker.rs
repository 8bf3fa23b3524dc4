//! Request/reply correlation over the channel layer (`spec.md` §4.3),
//! grounded in `troup/client.py`'s `CallbackWrapper`/`ChannelClient`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cohort_channel::Channel;
use cohort_clock::IntervalTimer;
use cohort_interfaces::Clock;
use cohort_manager::ChannelManager;
use cohort_types::Message;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::Promise;

#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("channel error: {0}")]
    Channel(String),
}

/// A pending request's entry in `RequestTracker::callbacks`
/// (`spec.md` §3's `CallbackWrapper`).
struct CallbackWrapper {
    promise: Arc<Promise<Value>>,
    deadline: Instant,
}

/// Tracks in-flight requests by message id and resolves their promises when
/// a matching `reply` arrives, or when a periodic sweep finds the deadline
/// has passed. Multi-target `send` gives each channel its own fresh message
/// id rather than reusing one id across targets: the original tracks
/// callbacks in a single `id -> wrapper` map keyed by the *shared* request
/// id, so sending the same message to more than one channel silently
/// overwrites all but the last-registered wrapper. Fresh per-channel ids
/// avoid that collision while keeping `send`'s documented aggregation
/// (single value for one target, `true` for more than one).
pub struct RequestTracker {
    manager: Arc<ChannelManager>,
    callbacks: DashMap<String, CallbackWrapper>,
    reply_timeout_ms: u64,
    sweep: IntervalTimer,
}

impl RequestTracker {
    pub fn new(
        manager: Arc<ChannelManager>,
        clock: Arc<dyn Clock>,
        reply_timeout_ms: u64,
        check_interval_ms: u64,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            manager,
            callbacks: DashMap::new(),
            reply_timeout_ms,
            sweep: IntervalTimer::new(
                "request-tracker-sweep",
                Duration::from_millis(check_interval_ms),
                Duration::ZERO,
            ),
        });
        let sweeper = this.clone();
        this.sweep
            .start(clock, Box::new(move || sweeper.sweep_once()));
        this
    }

    /// Feeds an inbound `type=reply` message to the tracker. Resolves and
    /// removes the matching callback if one is pending; otherwise the reply
    /// is an orphan (late, already timed out, or for an id we never sent)
    /// and is dropped.
    pub fn on_reply(&self, msg: &Message) {
        let Some(reply_for) = msg.reply_for() else {
            return;
        };
        let Some((_, wrapper)) = self.callbacks.remove(reply_for) else {
            warn!(reply_for, "reply for unknown or already-resolved request");
            return;
        };
        let error = msg
            .data
            .get("error")
            .filter(|v| !v.is_null())
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            });
        match error {
            Some(e) => wrapper.promise.complete(Err(TrackerError::Remote(e))),
            None => {
                let reply = msg.data.get("reply").cloned().unwrap_or(Value::Null);
                wrapper.promise.complete(Ok(reply));
            }
        }
    }

    fn sweep_once(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .callbacks
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            if let Some((_, wrapper)) = self.callbacks.remove(&id) {
                wrapper.promise.complete(Err(TrackerError::Timeout));
            }
        }
    }

    /// Sends `msg` to `to_node` (by channel name), or to every known channel
    /// when `to_node` is `None`. Returns an aggregate promise: one target
    /// resolves to that target's reply payload, more than one resolves to
    /// `true` once all targets have replied (or the first error, whichever
    /// comes first).
    pub async fn send(self: &Arc<Self>, msg: Message, to_node: Option<&str>) -> Arc<Promise<Value>> {
        let aggregate = Arc::new(Promise::new());

        let targets: Vec<Arc<Channel>> = if let Some(name) = to_node {
            match self.manager.channel(Some(name), None).await {
                Ok(channel) => vec![channel],
                Err(e) => {
                    aggregate.complete(Err(TrackerError::Channel(e.to_string())));
                    return aggregate;
                }
            }
        } else {
            self.manager.channels()
        };

        if targets.is_empty() {
            aggregate.complete(Err(TrackerError::Channel("no known channels".into())));
            return aggregate;
        }

        let mut per_target = Vec::with_capacity(targets.len());
        for channel in &targets {
            per_target.push(self.send_to_one(channel, &msg).await);
        }

        if per_target.len() == 1 {
            let only = per_target.into_iter().next().unwrap();
            let aggregate2 = aggregate.clone();
            tokio::spawn(async move {
                aggregate2.complete(only.result().await);
            });
            return aggregate;
        }

        tokio::spawn(async move {
            let mut first_error = None;
            for promise in &per_target {
                if let Err(e) = promise.result().await {
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => aggregate.complete(Err(e)),
                None => aggregate.complete(Ok(Value::Bool(true))),
            }
        });
        aggregate
    }

    /// Registers a fresh callback and hands `msg` (re-ided for this channel)
    /// to `channel.send`. The returned promise always resolves, even on an
    /// immediate send failure.
    async fn send_to_one(self: &Arc<Self>, channel: &Arc<Channel>, msg: &Message) -> Arc<Promise<Value>> {
        let promise = Arc::new(Promise::new());
        let per_msg = Message::with_id(Uuid::new_v4().to_string(), msg.data.clone());
        let per_msg = msg
            .headers
            .iter()
            .fold(per_msg, |m, (k, v)| match v {
                Some(v) => m.set_header(k.clone(), v.clone()),
                None => m,
            });

        self.callbacks.insert(
            per_msg.id.clone(),
            CallbackWrapper {
                promise: promise.clone(),
                deadline: Instant::now() + Duration::from_millis(self.reply_timeout_ms),
            },
        );

        let bytes = match per_msg.serialize() {
            Ok(json) => json.into_bytes(),
            Err(e) => {
                self.callbacks.remove(&per_msg.id);
                promise.complete(Err(TrackerError::Channel(e.to_string())));
                return promise;
            }
        };

        if let Err(e) = channel.send(bytes).await {
            self.callbacks.remove(&per_msg.id);
            promise.complete(Err(TrackerError::Channel(e.to_string())));
        }
        promise
    }

    pub fn shutdown(&self) {
        self.sweep.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_channel::{memory::MemoryTransport, EarlyStrategy};
    use cohort_clock::SystemClock;

    /// Mirrors `spec.md` §8 scenario 3: a request to a peer whose handler
    /// never replies resolves with `Timeout` within one sweep interval.
    #[tokio::test]
    async fn unanswered_request_resolves_timeout_within_one_sweep() {
        let transport = Arc::new(MemoryTransport::new());
        let mut listener = transport.bind("localhost", 9100).await.unwrap();
        tokio::spawn(async move {
            // Accept the connection but never reply to anything sent on it.
            let _ = listener.accept().await;
        });

        let manager = ChannelManager::new(transport.clone(), EarlyStrategy::default());
        manager
            .channel(Some("peer"), Some("ws://localhost:9100"))
            .await
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tracker = RequestTracker::new(manager.clone(), clock, 200, 50);

        let msg = Message::command("apps", serde_json::json!({}));
        let promise = tracker.send(msg, Some("peer")).await;

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_millis(700), promise.result())
            .await
            .expect("promise did not resolve within 700ms");
        assert!(matches!(result, Err(TrackerError::Timeout)));
        assert!(started.elapsed() < Duration::from_millis(700));
        tracker.shutdown();
    }
}
