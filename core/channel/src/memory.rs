use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cohort_interfaces::{Listener, Transport, TransportError, TransportEvent, TransportReceiver, TransportSender};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// In-process `Transport` double: `connect(url)` succeeds iff a peer has
/// called `MemoryTransport::bind` on that exact url first, wiring the two
/// sides together with unbounded channels. Backs `Channel` unit tests
/// without a real socket.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<PendingConnect>>>>,
}

struct PendingConnect {
    peer_url: String,
    to_listener: mpsc::UnboundedSender<TransportEvent>,
    reply: tokio::sync::oneshot::Sender<mpsc::UnboundedSender<TransportEvent>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError> {
        let accept_tx = self
            .listeners
            .lock()
            .get(url)
            .cloned()
            .ok_or(TransportError::Refused)?;

        let (to_listener, from_us) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        accept_tx
            .send(PendingConnect { peer_url: url.to_string(), to_listener, reply: reply_tx })
            .map_err(|_| TransportError::Refused)?;
        let to_us = reply_rx.await.map_err(|_| TransportError::Refused)?;

        Ok((
            Box::new(MemorySender { tx: to_us }),
            Box::new(MemoryReceiver { rx: from_us }),
        ))
    }

    async fn bind(&self, host: &str, port: u16) -> Result<Box<dyn Listener>, TransportError> {
        let url = format!("ws://{host}:{port}");
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(url.clone(), accept_tx);
        Ok(Box::new(MemoryListener { url, accept_rx }))
    }
}

struct MemoryListener {
    url: String,
    accept_rx: mpsc::UnboundedReceiver<PendingConnect>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn local_addr(&self) -> String {
        self.url.clone()
    }

    async fn accept(
        &mut self,
    ) -> Result<(String, Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError> {
        let pending = self.accept_rx.recv().await.ok_or(TransportError::Closed)?;
        let (to_them, from_listener) = mpsc::unbounded_channel();
        pending.reply.send(to_them).map_err(|_| TransportError::Closed)?;
        Ok((
            pending.peer_url,
            Box::new(MemorySender { tx: pending.to_listener }),
            Box::new(MemoryReceiver { rx: from_listener }),
        ))
    }
}

struct MemorySender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl TransportSender for MemorySender {
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(TransportEvent::Data(data))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let _ = self.tx.send(TransportEvent::Closed(Some(1000), None));
        Ok(())
    }
}

struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}
