use async_trait::async_trait;
use cohort_interfaces::{Listener, Transport, TransportError, TransportEvent, TransportReceiver, TransportSender};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

fn map_ws_err(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as E;
    match e {
        E::ConnectionClosed | E::AlreadyClosed => TransportError::Closed,
        E::Io(io) => TransportError::Io(io),
        other => TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

/// Real WebSocket transport for node-to-node links, backed by
/// `tokio-tungstenite` (`spec.md` §6's "full-duplex text-message transport
/// of WebSocket-like semantics").
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

struct TungsteniteSender<S> {
    sink: Mutex<futures_util::stream::SplitSink<WebSocketStream<S>, WsMessage>>,
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> TransportSender for TungsteniteSender<S> {
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(data)
            .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(text)).await.map_err(map_ws_err)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.close().await.map_err(map_ws_err)
    }
}

struct TungsteniteReceiver<S> {
    stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
    delivered_close: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> TungsteniteReceiver<S> {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if self.delivered_close {
                return None;
            }
            return match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => Some(TransportEvent::Data(text.into_bytes())),
                Some(Ok(WsMessage::Binary(bytes))) => Some(TransportEvent::Data(bytes)),
                Some(Ok(WsMessage::Close(frame))) => {
                    self.delivered_close = true;
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), Some(f.reason.to_string())))
                        .unwrap_or((None, None));
                    Some(TransportEvent::Closed(code, reason))
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) => {
                    self.delivered_close = true;
                    Some(TransportEvent::Closed(None, None))
                }
                None => {
                    self.delivered_close = true;
                    Some(TransportEvent::Closed(None, None))
                }
            };
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> TransportReceiver for TungsteniteReceiver<S> {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.next_event().await
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await.map_err(map_ws_err)?;
        let (sink, stream) = ws.split();
        Ok((
            Box::new(TungsteniteSender { sink: Mutex::new(sink) }),
            Box::new(TungsteniteReceiver { stream, delivered_close: false }),
        ))
    }

    async fn bind(&self, host: &str, port: u16) -> Result<Box<dyn Listener>, TransportError> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Box::new(TcpWsListener { listener }))
    }
}

struct TcpWsListener {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpWsListener {
    fn local_addr(&self) -> String {
        self.listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }

    async fn accept(
        &mut self,
    ) -> Result<(String, Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        let ws = tokio_tungstenite::accept_async(stream).await.map_err(map_ws_err)?;
        let (sink, stream) = ws.split();
        Ok((
            format!("ws://{peer}"),
            Box::new(TungsteniteSender { sink: Mutex::new(sink) }),
            Box::new(TungsteniteReceiver { stream, delivered_close: false }),
        ))
    }
}
