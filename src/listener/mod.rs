//! Reference echo listener.
//!
//! A minimal server under test: plain WebSocket on `port`, WebSocket over
//! TLS on `port + 1`. Text and binary frames come back verbatim. A text
//! frame reading exactly `ping` is answered with a Ping frame instead.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::tls::build_server_config;
use crate::transport::TLS_PORT_OFFSET;

pub mod cert;

/// Attempts at finding an ephemeral port whose successor is also free.
const EPHEMERAL_BIND_ATTEMPTS: usize = 16;

/// Text frame that triggers a Ping instead of an echo.
pub const PING_COMMAND: &str = "ping";

/// Bound but not yet serving.
pub struct ReferenceListener {
    plain: TcpListener,
    tls: TcpListener,
    acceptor: TlsAcceptor,
}

impl ReferenceListener {
    /// Bind both ports. `port = 0` picks a free ephemeral pair.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let (plain, tls) = if port == 0 {
            bind_ephemeral_pair(host).await?
        } else {
            let tls_port = port
                .checked_add(TLS_PORT_OFFSET)
                .with_context(|| format!("port {} leaves no room for the TLS port", port))?;
            let plain = TcpListener::bind((host, port))
                .await
                .with_context(|| format!("failed to bind plain listener on {}:{}", host, port))?;
            let tls = TcpListener::bind((host, tls_port))
                .await
                .with_context(|| format!("failed to bind TLS listener on {}:{}", host, tls_port))?;
            (plain, tls)
        };

        let (cert_der, key_der) = cert::generate_self_signed_cert(&cert::subject_names(host))?;
        let tls_config = build_server_config(cert_der, key_der)?;

        Ok(Self {
            plain,
            tls,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
        })
    }

    pub fn plain_addr(&self) -> Result<SocketAddr> {
        self.plain.local_addr().context("plain listener has no local address")
    }

    pub fn tls_addr(&self) -> Result<SocketAddr> {
        self.tls.local_addr().context("TLS listener has no local address")
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let plain_addr = self.plain_addr()?;
        let tls_addr = self.tls_addr()?;
        info!(plain = %plain_addr, tls = %tls_addr, "reference listener up");

        let plain = tokio::spawn(accept_plain(self.plain, shutdown.clone()));
        let tls = tokio::spawn(accept_tls(self.tls, self.acceptor, shutdown.clone()));

        shutdown.cancelled().await;
        let _ = tokio::join!(plain, tls);
        info!("reference listener stopped");
        Ok(())
    }

    /// Serve on a background task.
    pub fn spawn(self) -> Result<ListenerHandle> {
        let plain_addr = self.plain_addr()?;
        let tls_addr = self.tls_addr()?;
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        Ok(ListenerHandle {
            plain_addr,
            tls_addr,
            token,
            task,
        })
    }
}

/// A listener running in the background.
pub struct ListenerHandle {
    pub plain_addr: SocketAddr,
    pub tls_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ListenerHandle {
    /// Base port: what a harness run should be pointed at.
    pub fn port(&self) -> u16 {
        self.plain_addr.port()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();
        self.task.await.context("listener task panicked")?
    }
}

async fn bind_ephemeral_pair(host: &str) -> Result<(TcpListener, TcpListener)> {
    for _ in 0..EPHEMERAL_BIND_ATTEMPTS {
        let plain = TcpListener::bind((host, 0))
            .await
            .with_context(|| format!("failed to bind ephemeral port on {}", host))?;
        let port = plain.local_addr()?.port();
        let Some(tls_port) = port.checked_add(TLS_PORT_OFFSET) else {
            continue;
        };
        match TcpListener::bind((host, tls_port)).await {
            Ok(tls) => return Ok((plain, tls)),
            Err(e) => debug!(port = tls_port, error = %e, "TLS port taken, retrying"),
        }
    }
    bail!(
        "no free port pair on {} after {} attempts",
        host,
        EPHEMERAL_BIND_ATTEMPTS
    )
}

// ---------------------------------------------------------------------------
// Accept loops
// ---------------------------------------------------------------------------

async fn accept_plain(listener: TcpListener, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "failed to accept TCP connection");
                    continue;
                }
            },
        };
        debug!(%peer, "accepted plain connection");
        tokio::spawn(serve(stream, peer, shutdown.clone()));
    }
}

async fn accept_tls(listener: TcpListener, acceptor: TlsAcceptor, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "failed to accept TCP connection");
                    continue;
                }
            },
        };
        debug!(%peer, "accepted TLS connection");

        let acceptor = acceptor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match accept_handshake(&acceptor, stream).await {
                Ok(tls_stream) => serve(tls_stream, peer, shutdown).await,
                Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
            }
        });
    }
}

async fn accept_handshake(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
) -> std::io::Result<tokio_rustls::server::TlsStream<TcpStream>> {
    acceptor.accept(stream).await
}

/// Echo loop for one WebSocket session.
async fn serve<S>(stream: S, peer: SocketAddr, shutdown: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let mut frames = 0usize;
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws.next() => match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "read error, dropping session");
                    break;
                }
                None => break,
            },
        };

        let reply = match msg {
            Message::Text(text) if text.as_str() == PING_COMMAND => {
                Message::Ping(Default::default())
            }
            Message::Text(text) => Message::Text(text),
            Message::Binary(data) => Message::Binary(data),
            Message::Close(_) => break,
            // Ping/Pong are answered by tungstenite itself.
            _ => continue,
        };

        frames += 1;
        if let Err(e) = ws.send(reply).await {
            debug!(%peer, error = %e, "write error, dropping session");
            break;
        }
    }

    let _ = ws.close(None).await;
    debug!(%peer, frames, "session closed");
}
