use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failures, mapped by `Channel` into `ChannelError::Closed`
/// at the channel boundary (`spec.md` §7).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused")]
    Refused,
    #[error("connection reset")]
    Reset,
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One of the three hooks a WebSocket-like adapter delivers: `opened`,
/// `closed(code, reason)`, `onData(bytes)` (`spec.md` §9, REDESIGN FLAGS).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Opened,
    Data(Vec<u8>),
    Closed(Option<u16>, Option<String>),
}

/// The write half of an open transport connection. Cheaply cloneable so
/// `Channel` can hand out a sender without exposing the receive side.
#[async_trait]
pub trait TransportSender: Send + Sync {
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

/// The read half of an open transport connection; owned exclusively by the
/// one task that drives a `Channel`'s inbound loop, preserving in-order
/// delivery (`spec.md` §5).
#[async_trait]
pub trait TransportReceiver: Send {
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Dials a remote endpoint and splits the connection into its write/read
/// halves. The core depends only on this interface, never on a concrete
/// WebSocket library.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError>;

    /// Binds a server endpoint and returns a `Listener` that yields one
    /// accepted connection at a time.
    async fn bind(&self, host: &str, port: u16) -> Result<Box<dyn Listener>, TransportError>;
}

/// Server-side accept loop seam. `ChannelManager` polls this exclusively from
/// its one dedicated acceptor task (`spec.md` §5).
#[async_trait]
pub trait Listener: Send {
    /// Local address actually bound, e.g. after OS port assignment (`:0`).
    fn local_addr(&self) -> String;

    async fn accept(
        &mut self,
    ) -> Result<(String, Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError>;
}
