//! Bounded connection attempt.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::transport::{Connection, Endpoint, Transport};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Single-use guard shared by the timer and the open callback.
///
/// Whoever claims it first reports the outcome; the other side stands down.
#[derive(Debug, Clone, Default)]
pub struct CompletionToken(Arc<AtomicBool>);

impl CompletionToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once across all clones.
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Terminal result of one [`ConnectionProbe::open`] call.
pub enum ProbeOutcome {
    Ready(Box<dyn Connection>),
    TimedOut,
    ConnectError(String),
}

impl fmt::Debug for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Ready(conn) => write!(f, "Ready({})", conn.state()),
            ProbeOutcome::TimedOut => write!(f, "TimedOut"),
            ProbeOutcome::ConnectError(reason) => write!(f, "ConnectError({})", reason),
        }
    }
}

pub struct ConnectionProbe {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ConnectionProbe {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a connection to `endpoint`, bounded by the probe timeout.
    ///
    /// Always produces exactly one outcome. A connection that opens after the
    /// timer already fired is closed in the background and never reported.
    pub async fn open(&self, endpoint: &Endpoint) -> ProbeOutcome {
        let start = Instant::now();
        let token = CompletionToken::new();
        let (tx, mut rx) = oneshot::channel();

        let transport = Arc::clone(&self.transport);
        let task_endpoint = endpoint.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            let result = transport.connect(&task_endpoint).await;
            if task_token.claim() {
                let _ = tx.send(result);
            } else if let Ok(mut late) = result {
                debug!(endpoint = %task_endpoint, "closing connection that opened after the timeout");
                late.close().await;
            }
        });

        let timer = tokio::time::sleep(self.timeout);
        tokio::pin!(timer);

        let result = tokio::select! {
            result = &mut rx => result,
            _ = &mut timer => {
                if token.claim() {
                    warn!(
                        endpoint = %endpoint,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "connect timed out"
                    );
                    return ProbeOutcome::TimedOut;
                }
                // The open callback won the race; its result is already on the way.
                rx.await
            }
        };

        match result {
            Ok(Ok(conn)) => {
                info!(
                    endpoint = %endpoint,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "connection ready"
                );
                ProbeOutcome::Ready(conn)
            }
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "connect failed");
                ProbeOutcome::ConnectError(e.to_string())
            }
            Err(_) => ProbeOutcome::ConnectError("connect task ended without a result".to_string()),
        }
    }
}
