//! Connection capability used by the probes.
//!
//! The harness never speaks the WebSocket wire protocol itself. It only needs
//! to open a session to an [`Endpoint`], push opaque text or binary frames,
//! pull the next inbound frame and observe the session [`ConnState`]. The
//! [`Transport`] and [`Connection`] traits capture exactly that; [`ws`] backs
//! them with tokio-tungstenite.

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

pub mod tls;
pub mod ws;

#[cfg(test)]
pub(crate) mod scripted;

pub use ws::WsTransport;

/// Port offset between the plain listener and its TLS twin.
pub const TLS_PORT_OFFSET: u16 = 1;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    #[error("i/o error: {0}")]
    Io(String),

    #[error("connection is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scheme {
    Ws,
    Wss,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Ws => write!(f, "ws"),
            Scheme::Wss => write!(f, "wss"),
        }
    }
}

/// Where a test connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Ws,
            host: host.into(),
            port,
        }
    }

    /// TLS endpoint for a server whose plain listener sits on `base_port`.
    ///
    /// The server under test must serve TLS on `base_port + 1`.
    pub fn tls(host: impl Into<String>, base_port: u16) -> Result<Self, TransportError> {
        let port = base_port.checked_add(TLS_PORT_OFFSET).ok_or_else(|| {
            TransportError::InvalidEndpoint(format!(
                "base port {} leaves no room for the TLS listener",
                base_port
            ))
        })?;
        Ok(Self {
            scheme: Scheme::Wss,
            host: host.into(),
            port,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Wss
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}/", self.scheme, self.authority())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnState::Connecting => 0,
            ConnState::Open => 1,
            ConnState::Closing => 2,
            ConnState::Closed => 3,
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Connecting => write!(f, "CONNECTING"),
            ConnState::Open => write!(f, "OPEN"),
            ConnState::Closing => write!(f, "CLOSING"),
            ConnState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Connection state shared between a handle and its background reader.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(state: ConnState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub fn get(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move to `Closed` unless already there. Returns the previous state.
    pub fn mark_closed(&self) -> ConnState {
        ConnState::from_u8(self.0.swap(ConnState::Closed.as_u8(), Ordering::AcqRel))
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// An opaque frame body. Equality is byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Payload::Text(s.into())
    }

    pub fn binary(b: impl Into<Bytes>) -> Self {
        Payload::Binary(b.into())
    }

    /// Length in bytes (not characters).
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Something that can open connections.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Short human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Whether this environment can open connections at all.
    fn is_available(&self) -> bool;

    /// Open a connection. Resolves once the session is OPEN or has failed.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open network session, exclusively owned by the test that opened it.
#[async_trait::async_trait]
pub trait Connection: Send {
    fn state(&self) -> ConnState;

    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Payload>;

    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_endpoint_url() {
        let ep = Endpoint::plain("localhost", 44010);
        assert_eq!(ep.url(), "ws://localhost:44010/");
        assert!(!ep.is_tls());
        assert_eq!(ep.to_string(), "ws://localhost:44010");
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let ep = Endpoint::plain("::1", 44010);
        assert_eq!(ep.url(), "ws://[::1]:44010/");
        assert_eq!(ep.to_string(), "ws://[::1]:44010");
        let tls = Endpoint::tls("fe80::2", 44010).unwrap();
        assert_eq!(tls.url(), "wss://[fe80::2]:44011/");
        // IPv4 and names are left alone.
        assert_eq!(Endpoint::plain("10.0.0.1", 80).authority(), "10.0.0.1:80");
    }

    #[test]
    fn test_tls_endpoint_uses_next_port() {
        let ep = Endpoint::tls("localhost", 44010).unwrap();
        assert_eq!(ep.port, 44011);
        assert_eq!(ep.url(), "wss://localhost:44011/");
        assert!(ep.is_tls());
    }

    #[test]
    fn test_tls_endpoint_rejects_last_port() {
        let err = Endpoint::tls("localhost", u16::MAX).unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new(ConnState::Connecting);
        assert_eq!(cell.get(), ConnState::Connecting);
        cell.set(ConnState::Open);
        let observer = cell.clone();
        assert_eq!(observer.get(), ConnState::Open);
        assert_eq!(cell.mark_closed(), ConnState::Open);
        assert_eq!(observer.get(), ConnState::Closed);
    }

    #[test]
    fn test_payload_len_counts_bytes() {
        let p = Payload::text("Alcalá");
        assert_eq!(p.len(), 7);
        assert_eq!(Payload::binary(vec![1u8, 2, 3]).len(), 3);
        assert!(Payload::text("").is_empty());
    }

    #[test]
    fn test_text_and_binary_with_same_bytes_differ() {
        assert_ne!(Payload::text("abc"), Payload::binary(b"abc".to_vec()));
    }
}
