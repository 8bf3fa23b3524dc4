use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cohort_interfaces::{Transport, TransportError, TransportEvent, TransportReceiver, TransportSender};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// `spec.md` §3's Channel status DAG. `Error` is absorbing; every close path
/// ends at `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Created,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

/// What happens to a `send()` attempted before the channel reaches `Open`.
#[derive(Debug, Clone)]
pub enum EarlyStrategy {
    Queue(usize),
    Reject,
    Drop,
}

impl Default for EarlyStrategy {
    fn default() -> Self {
        EarlyStrategy::Queue(1000)
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} is already open or connecting")]
    AlreadyOpen(String),
    #[error("channel {0} is not open")]
    NotOpen(String),
    #[error("channel {0} is closed")]
    Closed(String),
    #[error("early message on channel {0} rejected")]
    EarlyRejected(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Invoked for every inbound frame, in strict per-channel order. A listener
/// returning `Err` is logged and does not prevent delivery to the rest
/// (`spec.md` §4.1).
pub type DataListener = Box<dyn Fn(&[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;
pub type OpenListener = Box<dyn Fn(&Channel) + Send + Sync>;
pub type ClosedListener = Box<dyn Fn(&Channel, Option<u16>, Option<String>) + Send + Sync>;

struct ChannelState {
    status: ChannelStatus,
    early_queue: VecDeque<Vec<u8>>,
    sender: Option<Arc<dyn TransportSender>>,
}

/// Lifecycle state machine over a bidirectional byte link, with early-send
/// buffering (`spec.md` §4.1). Depends only on `Transport`/`TransportSender`/
/// `TransportReceiver` from `cohort-interfaces`, never on a concrete
/// WebSocket library.
pub struct Channel {
    name: String,
    to_url: String,
    early_strategy: EarlyStrategy,
    /// Accepted (server-side) channels wait for the remote's close frame to
    /// be observed before `close()` returns; outgoing channels close
    /// fire-and-forget, mirroring `IncommingChannel` vs
    /// `OutgoingChannelOverWS` in the original.
    waits_for_remote_close: bool,
    state: Mutex<ChannelState>,
    listeners: RwLock<Vec<DataListener>>,
    open_listeners: RwLock<Vec<OpenListener>>,
    closed_listeners: RwLock<Vec<ClosedListener>>,
    remote_closed: Notify,
    closed_delivered: AtomicBool,
}

impl Channel {
    pub fn outgoing(name: impl Into<String>, to_url: impl Into<String>, early_strategy: EarlyStrategy) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            to_url: to_url.into(),
            early_strategy,
            waits_for_remote_close: false,
            state: Mutex::new(ChannelState {
                status: ChannelStatus::Created,
                early_queue: VecDeque::new(),
                sender: None,
            }),
            listeners: RwLock::new(Vec::new()),
            open_listeners: RwLock::new(Vec::new()),
            closed_listeners: RwLock::new(Vec::new()),
            remote_closed: Notify::new(),
            closed_delivered: AtomicBool::new(false),
        })
    }

    /// Wraps a connection already accepted by a server-side `Listener`.
    /// Starts in `Created`; `open_with` finishes the transition to `Open`
    /// once the caller hands over the split sender/receiver, mirroring the
    /// source's `IncommingChannel`, which still runs through `open()` even
    /// though its `connect()` is a no-op over an already-established socket.
    pub fn accepted(name: impl Into<String>, to_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            to_url: to_url.into(),
            early_strategy: EarlyStrategy::Reject,
            waits_for_remote_close: true,
            state: Mutex::new(ChannelState {
                status: ChannelStatus::Created,
                early_queue: VecDeque::new(),
                sender: None,
            }),
            listeners: RwLock::new(Vec::new()),
            open_listeners: RwLock::new(Vec::new()),
            closed_listeners: RwLock::new(Vec::new()),
            remote_closed: Notify::new(),
            closed_delivered: AtomicBool::new(false),
        })
    }

    /// Completes `open()` for a channel whose transport connection is
    /// already established (the accepted-connection path); there is no
    /// early queue to flush because the remote is already talking to us.
    pub async fn open_with(
        self: &Arc<Self>,
        sender: Box<dyn TransportSender>,
        receiver: Box<dyn TransportReceiver>,
    ) -> Result<(), ChannelError> {
        {
            let mut st = self.state.lock().await;
            if st.status != ChannelStatus::Created {
                return Err(ChannelError::AlreadyOpen(self.name.clone()));
            }
            st.status = ChannelStatus::Open;
            st.sender = Some(Arc::from(sender));
        }
        self.spawn_inbound_loop(receiver);
        for listener in self.open_listeners.read().iter() {
            listener(self);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_url(&self) -> &str {
        &self.to_url
    }

    pub async fn status(&self) -> ChannelStatus {
        self.state.lock().await.status
    }

    /// Legal only from `Created`. Dials `transport`, flushing any buffered
    /// early sends in enqueue order before the channel is marked `Open` and
    /// any concurrently-racing `send()` is allowed through.
    pub async fn open(self: &Arc<Self>, transport: &dyn Transport) -> Result<(), ChannelError> {
        {
            let mut st = self.state.lock().await;
            if st.status != ChannelStatus::Created {
                return Err(ChannelError::AlreadyOpen(self.name.clone()));
            }
            st.status = ChannelStatus::Connecting;
        }

        match transport.connect(&self.to_url).await {
            Ok((sender, receiver)) => {
                let sender: Arc<dyn TransportSender> = Arc::from(sender);
                {
                    let mut st = self.state.lock().await;
                    st.sender = Some(sender.clone());
                    while let Some(buffered) = st.early_queue.pop_front() {
                        if let Err(e) = sender.send(buffered).await {
                            warn!(channel = %self.name, error = %e, "early-flush send failed");
                        }
                    }
                    st.status = ChannelStatus::Open;
                }
                self.spawn_inbound_loop(receiver);
                for listener in self.open_listeners.read().iter() {
                    listener(self);
                }
                Ok(())
            }
            Err(e) => {
                let mut st = self.state.lock().await;
                st.status = ChannelStatus::Error;
                Err(ChannelError::Transport(e))
            }
        }
    }

    /// Legal only from `Open`.
    pub async fn close(&self) -> Result<(), ChannelError> {
        let sender = {
            let mut st = self.state.lock().await;
            if st.status != ChannelStatus::Open {
                return Err(ChannelError::NotOpen(self.name.clone()));
            }
            st.status = ChannelStatus::Closing;
            st.sender.clone()
        };

        if let Some(sender) = sender {
            let _ = sender.close().await;
        }

        if self.waits_for_remote_close {
            self.remote_closed.notified().await;
        } else {
            self.state.lock().await.status = ChannelStatus::Closed;
            self.deliver_closed(None, None);
        }
        Ok(())
    }

    /// `Open` forwards to the transport; `Created`/`Connecting` buffer per
    /// `early_strategy`; every other status rejects with `Closed`. The
    /// single `tokio::sync::Mutex` held across the transport write is the
    /// literal realization of the tie-break rule in `spec.md` §4.1.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), ChannelError> {
        let mut st = self.state.lock().await;
        match st.status {
            ChannelStatus::Open => {
                let sender = st.sender.clone().expect("sender set when Open");
                drop(st);
                sender.send(data).await.map_err(|e| {
                    warn!(channel = %self.name, error = %e, "send failed, treating channel as closed");
                    ChannelError::Transport(e)
                })
            }
            ChannelStatus::Created | ChannelStatus::Connecting => match &self.early_strategy {
                EarlyStrategy::Queue(cap) => {
                    if st.early_queue.len() >= *cap {
                        Err(ChannelError::EarlyRejected(self.name.clone()))
                    } else {
                        st.early_queue.push_back(data);
                        Ok(())
                    }
                }
                EarlyStrategy::Reject => Err(ChannelError::EarlyRejected(self.name.clone())),
                EarlyStrategy::Drop => {
                    debug!(channel = %self.name, "dropping early message, no buffering strategy");
                    Ok(())
                }
            },
            _ => Err(ChannelError::Closed(self.name.clone())),
        }
    }

    pub fn register_listener(&self, listener: DataListener) {
        self.listeners.write().push(listener);
    }

    pub fn on_open(&self, listener: OpenListener) {
        self.open_listeners.write().push(listener);
    }

    pub fn on_closed(&self, listener: ClosedListener) {
        self.closed_listeners.write().push(listener);
    }

    fn data_received(&self, data: &[u8]) {
        for listener in self.listeners.read().iter() {
            if let Err(e) = listener(data) {
                warn!(channel = %self.name, error = %e, "listener error");
            }
        }
    }

    fn deliver_closed(&self, code: Option<u16>, reason: Option<String>) {
        if self.closed_delivered.swap(true, Ordering::AcqRel) {
            return;
        }
        for listener in self.closed_listeners.read().iter() {
            listener(self, code, reason.clone());
        }
    }

    fn spawn_inbound_loop(self: &Arc<Self>, mut receiver: Box<dyn TransportReceiver>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match event {
                    TransportEvent::Opened => {}
                    TransportEvent::Data(bytes) => {
                        if this.closed_delivered.load(Ordering::Acquire) {
                            continue;
                        }
                        this.data_received(&bytes);
                    }
                    TransportEvent::Closed(code, reason) => {
                        {
                            let mut st = this.state.lock().await;
                            st.status = ChannelStatus::Closed;
                        }
                        this.remote_closed.notify_waiters();
                        this.deliver_closed(code, reason);
                        return;
                    }
                }
            }
        });
    }
}
