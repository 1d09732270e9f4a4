//! Echo and burst validation over an open connection.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::transport::{ConnState, Connection, Payload, TransportError};

pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EchoOutcome {
    Match,
    Mismatch { expected_len: usize, actual_len: usize },
    /// Same bytes, but text came back as binary or the other way round.
    KindMismatch,
    /// The peer closed before replying.
    PeerClosed,
    /// No reply within the configured reply timeout.
    NoReply { waited_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BurstOutcome {
    Alive { sent: usize },
    Degraded { sent: usize, state: ConnState },
}

pub struct EchoValidator {
    reply_timeout: Option<Duration>,
    settle_window: Duration,
}

impl Default for EchoValidator {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            settle_window: DEFAULT_SETTLE_WINDOW,
        }
    }
}

impl EchoValidator {
    pub fn new(reply_timeout: Option<Duration>, settle_window: Duration) -> Self {
        Self {
            reply_timeout,
            settle_window,
        }
    }

    /// Send `payload` once and compare the next inbound frame against it.
    ///
    /// The comparison is against the caller's own `payload`, byte for byte,
    /// and the frame kind must match too.
    /// Without a reply timeout a silent peer stalls this call indefinitely.
    pub async fn send_and_expect_echo(
        &self,
        conn: &mut dyn Connection,
        payload: &Payload,
    ) -> Result<EchoOutcome, TransportError> {
        conn.send(payload).await?;
        debug!(bytes = payload.len(), "payload sent, awaiting echo");

        let reply = match self.reply_timeout {
            Some(limit) => match tokio::time::timeout(limit, conn.recv()).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "no echo within reply timeout");
                    return Ok(EchoOutcome::NoReply {
                        waited_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => conn.recv().await,
        };

        let Some(reply) = reply else {
            return Ok(EchoOutcome::PeerClosed);
        };

        if reply == *payload {
            Ok(EchoOutcome::Match)
        } else if reply.as_bytes() == payload.as_bytes() {
            warn!(bytes = payload.len(), "echo came back as a different frame kind");
            Ok(EchoOutcome::KindMismatch)
        } else {
            warn!(
                expected_len = payload.len(),
                actual_len = reply.len(),
                "echo differs from payload"
            );
            Ok(EchoOutcome::Mismatch {
                expected_len: payload.len(),
                actual_len: reply.len(),
            })
        }
    }

    /// Fire every payload without waiting for replies, then check liveness
    /// once the settle window has passed.
    pub async fn burst_send(&self, conn: &mut dyn Connection, payloads: &[Payload]) -> BurstOutcome {
        let mut sent = 0;
        for payload in payloads {
            if let Err(e) = conn.send(payload).await {
                warn!(sent, error = %e, "burst interrupted");
                return BurstOutcome::Degraded {
                    sent,
                    state: conn.state(),
                };
            }
            sent += 1;
        }
        let bytes: usize = payloads.iter().map(Payload::len).sum();
        info!(sent, bytes, settle_ms = self.settle_window.as_millis() as u64, "burst sent");

        tokio::time::sleep(self.settle_window).await;

        match conn.state() {
            ConnState::Open => BurstOutcome::Alive { sent },
            state => BurstOutcome::Degraded { sent, state },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::{Peer, ScriptedTransport};
    use crate::transport::{Endpoint, Transport};

    async fn open(peer: Peer) -> Box<dyn Connection> {
        ScriptedTransport::new(peer)
            .connect(&Endpoint::plain("localhost", 1234))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_echo_match() {
        let mut conn = open(Peer::Echo).await;
        let outcome = EchoValidator::default()
            .send_and_expect_echo(conn.as_mut(), &Payload::text("This is a test"))
            .await
            .unwrap();
        assert_eq!(outcome, EchoOutcome::Match);
    }

    #[tokio::test]
    async fn test_echo_match_empty_and_multibyte() {
        let mut conn = open(Peer::Echo).await;
        let validator = EchoValidator::default();
        for payload in [Payload::text(""), Payload::text("ñandú · 東京 · ☃")] {
            let outcome = validator
                .send_and_expect_echo(conn.as_mut(), &payload)
                .await
                .unwrap();
            assert_eq!(outcome, EchoOutcome::Match);
        }
    }

    #[tokio::test]
    async fn test_echo_mismatch_reports_lengths() {
        let mut conn = open(Peer::Mangle).await;
        let outcome = EchoValidator::default()
            .send_and_expect_echo(conn.as_mut(), &Payload::text("hello"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EchoOutcome::Mismatch {
                expected_len: 5,
                actual_len: 6
            }
        );
    }

    #[tokio::test]
    async fn test_text_echoed_as_binary_is_not_a_match() {
        let mut conn = open(Peer::Rebinary).await;
        let outcome = EchoValidator::default()
            .send_and_expect_echo(conn.as_mut(), &Payload::text("hi"))
            .await
            .unwrap();
        assert_eq!(outcome, EchoOutcome::KindMismatch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_timeout_when_configured() {
        let mut conn = open(Peer::Silent).await;
        let validator = EchoValidator::new(Some(Duration::from_millis(750)), DEFAULT_SETTLE_WINDOW);
        let outcome = validator
            .send_and_expect_echo(conn.as_mut(), &Payload::text("anyone?"))
            .await
            .unwrap();
        assert_eq!(outcome, EchoOutcome::NoReply { waited_ms: 750 });
    }

    #[tokio::test]
    async fn test_silent_peer_without_reply_timeout_stays_pending() {
        let mut conn = open(Peer::Silent).await;
        let validator = EchoValidator::default();
        let payload = Payload::text("anyone?");

        let mut fut = tokio_test::task::spawn(validator.send_and_expect_echo(conn.as_mut(), &payload));
        tokio_test::assert_pending!(fut.poll());
        tokio_test::assert_pending!(fut.poll());
    }

    #[tokio::test]
    async fn test_send_on_closed_connection_errors() {
        let mut conn = open(Peer::Echo).await;
        conn.close().await;
        let result = EchoValidator::default()
            .send_and_expect_echo(conn.as_mut(), &Payload::text("late"))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_alive() {
        let mut conn = open(Peer::Echo).await;
        let payloads: Vec<Payload> = (0..10).map(|i| Payload::text(format!("m{}", i))).collect();
        let outcome = EchoValidator::default()
            .burst_send(conn.as_mut(), &payloads)
            .await;
        assert_eq!(outcome, BurstOutcome::Alive { sent: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_degraded_when_peer_drops() {
        let mut conn = open(Peer::DropAfter(3)).await;
        let payloads: Vec<Payload> = (0..10).map(|i| Payload::text(format!("m{}", i))).collect();
        let outcome = EchoValidator::default()
            .burst_send(conn.as_mut(), &payloads)
            .await;
        assert_eq!(
            outcome,
            BurstOutcome::Degraded {
                sent: 4,
                state: ConnState::Closed
            }
        );
    }
}
