//! In-memory transport with scripted peer behaviour, for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ConnState, Connection, Endpoint, Payload, StateCell, Transport, TransportError};

#[derive(Debug, Clone)]
pub enum Peer {
    /// Opens immediately and echoes every frame.
    Echo,
    /// Opens after the delay, then echoes.
    SlowOpen(Duration),
    /// The handshake never completes.
    NeverOpen,
    /// Refuses the connection.
    Refuse(String),
    /// Replies with the frame plus one trailing byte.
    Mangle,
    /// Echoes the same bytes, always as a binary frame.
    Rebinary,
    /// Opens but never replies.
    Silent,
    /// Echoes `n` frames, then drops the connection.
    DropAfter(usize),
}

#[derive(Debug, Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub frames: AtomicUsize,
}

pub struct ScriptedTransport {
    peer: Peer,
    available: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedTransport {
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            available: true,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Peer::Echo)
        }
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        match &self.peer {
            Peer::NeverOpen => std::future::pending::<()>().await,
            Peer::Refuse(reason) => {
                return Err(TransportError::Handshake {
                    endpoint: endpoint.to_string(),
                    reason: reason.clone(),
                })
            }
            Peer::SlowOpen(delay) => tokio::time::sleep(*delay).await,
            _ => {}
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            peer: self.peer.clone(),
            state: StateCell::new(ConnState::Open),
            replies: VecDeque::new(),
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedConnection {
    peer: Peer,
    state: StateCell,
    replies: VecDeque<Payload>,
    counters: Arc<Counters>,
}

#[async_trait::async_trait]
impl Connection for ScriptedConnection {
    fn state(&self) -> ConnState {
        self.state.get()
    }

    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        if self.state.get() != ConnState::Open {
            return Err(TransportError::Closed);
        }
        let seen = self.counters.frames.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.peer {
            Peer::Silent => {}
            Peer::Mangle => {
                let mut bytes = payload.as_bytes().to_vec();
                bytes.push(b'!');
                self.replies.push_back(Payload::binary(bytes));
            }
            Peer::Rebinary => {
                self.replies
                    .push_back(Payload::binary(payload.as_bytes().to_vec()));
            }
            Peer::DropAfter(n) if seen > *n => {
                self.state.set(ConnState::Closed);
            }
            _ => self.replies.push_back(payload.clone()),
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Payload> {
        if let Some(reply) = self.replies.pop_front() {
            return Some(reply);
        }
        if self.state.get() == ConnState::Closed {
            return None;
        }
        std::future::pending().await
    }

    async fn close(&mut self) {
        if self.state.mark_closed() != ConnState::Closed {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
