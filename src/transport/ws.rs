//! tokio-tungstenite backed [`Transport`].

use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{tls, ConnState, Connection, Endpoint, Payload, StateCell, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close()` waits for the peer to acknowledge the close handshake.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// WebSocket transport for `ws://` and `wss://` endpoints.
pub struct WsTransport {
    tls_config: Arc<ClientConfig>,
}

impl WsTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            tls_config: Arc::new(tls::build_client_config()?),
        })
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    fn name(&self) -> &str {
        "tokio-tungstenite"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let connector = if endpoint.is_tls() {
            Connector::Rustls(self.tls_config.clone())
        } else {
            Connector::Plain
        };

        debug!(endpoint = %endpoint, "opening websocket");
        let (stream, response) =
            connect_async_tls_with_config(endpoint.url(), None, true, Some(connector))
                .await
                .map_err(|e| TransportError::Handshake {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        debug!(endpoint = %endpoint, status = %response.status(), "websocket open");

        Ok(Box::new(WsConnection::spawn(stream, endpoint.clone())))
    }
}

/// An open WebSocket session.
///
/// Inbound frames are drained by a background task into an unbounded queue,
/// so the server can keep echoing while we are still pushing a burst.
pub struct WsConnection {
    endpoint: Endpoint,
    sink: SplitSink<WsStream, Message>,
    inbound: mpsc::UnboundedReceiver<Payload>,
    state: StateCell,
    reader: JoinHandle<()>,
}

impl WsConnection {
    fn spawn(stream: WsStream, endpoint: Endpoint) -> Self {
        let (sink, mut source) = stream.split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let state = StateCell::new(ConnState::Open);

        let reader_state = state.clone();
        let reader_endpoint = endpoint.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let payload = match frame {
                    Ok(Message::Text(text)) => Payload::Text(text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => Payload::Binary(data),
                    Ok(Message::Close(reason)) => {
                        debug!(endpoint = %reader_endpoint, ?reason, "peer closed");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(endpoint = %reader_endpoint, error = %e, "read failed");
                        break;
                    }
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
            reader_state.mark_closed();
        });

        Self {
            endpoint,
            sink,
            inbound,
            state,
            reader,
        }
    }
}

#[async_trait::async_trait]
impl Connection for WsConnection {
    fn state(&self) -> ConnState {
        self.state.get()
    }

    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        if self.state.get() != ConnState::Open {
            return Err(TransportError::Closed);
        }
        let message = match payload {
            Payload::Text(text) => Message::text(text.clone()),
            Payload::Binary(data) => Message::binary(data.clone()),
        };
        if let Err(e) = self.sink.send(message).await {
            warn!(endpoint = %self.endpoint, error = %e, "send failed");
            self.state.mark_closed();
            return Err(TransportError::Io(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Payload> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        if self.state.get() == ConnState::Closed {
            return;
        }
        self.state.set(ConnState::Closing);
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        if tokio::time::timeout(CLOSE_GRACE, &mut self.reader).await.is_err() {
            debug!(endpoint = %self.endpoint, "peer did not finish close handshake");
            self.reader.abort();
        }
        self.state.set(ConnState::Closed);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
