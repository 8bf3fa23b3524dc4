//! Ports the cohort core depends on and the `cohort-node` facade wires up to
//! concrete adapters: statistics collection, the app catalog, process
//! launching, wall-clock scheduling, and the channel transport.

mod catalog;
mod clock;
mod launcher;
mod lifecycle;
mod stats_source;
mod transport;

pub use catalog::{AppCatalog, CatalogError};
pub use clock::{CancelHandle, Clock};
pub use launcher::{LaunchError, ProcessHandle, ProcessLauncher, ProcessSpec, SshTarget};
pub use lifecycle::WithStartAndShutdown;
pub use stats_source::StatsSource;
pub use transport::{
    Listener, Transport, TransportError, TransportEvent, TransportReceiver, TransportSender,
};
