//! Named/URL-keyed channel registry with `channel.open`/`channel.data`/
//! `channel.closed` fan-out (`spec.md` §4.2).

use std::sync::Arc;

use cohort_bus::MessageBus;
use cohort_channel::{Channel, ChannelError, EarlyStrategy};
use cohort_interfaces::{Listener, Transport};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no channel name or url specified")]
    NoTargetSpecified,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Fan-out events re-emitted by the manager for every channel it owns.
#[derive(Clone)]
pub enum ManagerEvent {
    Open(Arc<Channel>),
    Closed(Arc<Channel>),
    Data(Arc<Channel>, Vec<u8>),
}

/// `by_name`/`by_url` stay consistent with each other because every mutating
/// sequence runs under `registrar`; reads go straight through the `DashMap`s
/// (`spec.md` §5, "ChannelManager's two indices are updated atomically with
/// respect to each other").
pub struct ChannelManager {
    transport: Arc<dyn Transport>,
    early_strategy: EarlyStrategy,
    by_name: DashMap<String, Arc<Channel>>,
    by_url: DashMap<String, Arc<Channel>>,
    registrar: Mutex<()>,
    events: MessageBus<ManagerEvent>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(transport: Arc<dyn Transport>, early_strategy: EarlyStrategy) -> Arc<Self> {
        Arc::new(Self {
            transport,
            early_strategy,
            by_name: DashMap::new(),
            by_url: DashMap::new(),
            registrar: Mutex::new(()),
            events: MessageBus::new(),
            accept_task: Mutex::new(None),
        })
    }

    pub fn events(&self) -> &MessageBus<ManagerEvent> {
        &self.events
    }

    /// Binds `host:port` and accepts inbound connections on a dedicated
    /// task, one at a time, for the lifetime of the manager (`spec.md` §5's
    /// single acceptor thread).
    pub async fn listen(self: &Arc<Self>, host: &str, port: u16) -> Result<String, ManagerError> {
        let mut listener = self
            .transport
            .bind(host, port)
            .await
            .map_err(ChannelError::from)?;
        let local_addr = listener.local_addr();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.accept_loop(listener.as_mut()).await });
        *self.accept_task.lock().await = Some(handle);
        Ok(local_addr)
    }

    async fn accept_loop(self: &Arc<Self>, listener: &mut dyn Listener) {
        loop {
            match listener.accept().await {
                Ok((peer_url, sender, receiver)) => {
                    let name = format!("channel[{peer_url}]");
                    let channel = Channel::accepted(name.clone(), peer_url.clone());
                    self.wire_channel(&channel);
                    if let Err(e) = channel.open_with(sender, receiver).await {
                        warn!(error = %e, "failed to finish opening accepted channel");
                        continue;
                    }
                    self.by_name.insert(name, channel.clone());
                    self.by_url.insert(peer_url, channel.clone());
                    self.events.publish("channel.open", &ManagerEvent::Open(channel));
                }
                Err(e) => {
                    warn!(error = %e, "accept loop ended");
                    return;
                }
            }
        }
    }

    /// Resolves to an existing channel by name, then by url; otherwise dials
    /// a new outgoing channel.
    pub async fn channel(
        self: &Arc<Self>,
        name: Option<&str>,
        url: Option<&str>,
    ) -> Result<Arc<Channel>, ManagerError> {
        if let Some(name) = name {
            if let Some(existing) = self.by_name.get(name) {
                return Ok(existing.clone());
            }
        }
        if let Some(url) = url {
            if let Some(existing) = self.by_url.get(url) {
                return Ok(existing.clone());
            }
        }
        let Some(url) = url else {
            return Err(ManagerError::NoTargetSpecified);
        };
        let name = name.unwrap_or(url).to_string();
        self.open_channel_to(name, url.to_string()).await
    }

    async fn open_channel_to(
        self: &Arc<Self>,
        name: String,
        url: String,
    ) -> Result<Arc<Channel>, ManagerError> {
        let _guard = self.registrar.lock().await;
        let channel = Channel::outgoing(name.clone(), url.clone(), self.early_strategy.clone());
        self.wire_channel(&channel);

        match channel.open(&*self.transport).await {
            Ok(()) => {
                self.by_name.insert(name, channel.clone());
                self.by_url.insert(url, channel.clone());
                self.events.publish("channel.open", &ManagerEvent::Open(channel.clone()));
                Ok(channel)
            }
            Err(e) => {
                // Failure to connect surfaces as `channel.closed`, never `channel.open`.
                self.events.publish("channel.closed", &ManagerEvent::Closed(channel));
                Err(e.into())
            }
        }
    }

    fn wire_channel(self: &Arc<Self>, channel: &Arc<Channel>) {
        let this = self.clone();
        let data_channel = channel.clone();
        channel.register_listener(Box::new(move |data: &[u8]| {
            this.events.publish("channel.data", &ManagerEvent::Data(data_channel.clone(), data.to_vec()));
            Ok(())
        }));

        let this = self.clone();
        channel.on_closed(Box::new(move |ch, _code, _reason| {
            this.handle_closed_channel(ch.name(), ch.to_url());
        }));
    }

    fn handle_closed_channel(self: &Arc<Self>, name: &str, url: &str) {
        if let Some((_, channel)) = self.by_name.remove(name) {
            self.by_url.remove(url);
            debug!(channel = name, "removed from manager indices");
            self.events.publish("channel.closed", &ManagerEvent::Closed(channel));
        }
    }

    pub async fn send(
        self: &Arc<Self>,
        name: Option<&str>,
        url: Option<&str>,
        data: Vec<u8>,
    ) -> Result<(), ManagerError> {
        let channel = self.channel(name, url).await?;
        if let Err(e) = channel.send(data).await {
            warn!(channel = channel.name(), error = %e, "send failed, tearing down channel");
            let _ = channel.close().await;
            self.handle_closed_channel(channel.name(), channel.to_url());
            return Err(e.into());
        }
        Ok(())
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.by_name.iter().map(|e| e.value().clone()).collect()
    }

    /// Closes and prunes the channel registered under `url`, if any. Used by
    /// `SyncManager` when a peer reappears under a new endpoint and the
    /// stale one must be torn down (`spec.md` §4.6's `_merge_node_`).
    pub async fn close_by_url(self: &Arc<Self>, url: &str) {
        let Some(channel) = self.by_url.get(url).map(|e| e.value().clone()) else {
            return;
        };
        let _ = channel.close().await;
        self.handle_closed_channel(channel.name(), channel.to_url());
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.accept_task.lock().await.take() {
            handle.abort();
        }
        for entry in self.by_name.iter() {
            let _ = entry.value().close().await;
        }
        info!("channel manager shut down");
    }
}
