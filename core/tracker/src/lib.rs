//! Request/reply correlation: a `Promise` cell plus the `RequestTracker`
//! that completes one from an inbound `reply` or a timeout sweep
//! (`spec.md` §4.3).

mod promise;
mod tracker;

pub use promise::Promise;
pub use tracker::{RequestTracker, TrackerError};
