//! Regression scenarios and the contract the sequencer drives them through.
//!
//! A scenario is anything implementing [`TestCase`]: given a [`TestContext`]
//! it eventually resolves to success or to a [`TestFailure`]. It never touches
//! the run state; the sequencer alone decides what happens next.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::probes::{
    ConnectionProbe, EchoValidator, ProbeOutcome, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SETTLE_WINDOW,
};
use crate::sequencer::{Registry, RegistryError};
use crate::transport::{ConnState, Connection, Endpoint, Transport, TransportError};

pub mod availability;
pub mod burst;
pub mod connect;
pub mod echo;
pub mod payload;

pub use payload::MessageSize;

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TestFailure {
    #[error("environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("connect to {endpoint} timed out after {timeout_ms} ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    #[error("connect to {endpoint} failed: {reason}")]
    ConnectError { endpoint: String, reason: String },

    #[error("echo mismatch: sent {expected_len} bytes, received {actual_len} bytes")]
    ProtocolMismatch { expected_len: usize, actual_len: usize },

    #[error("echo came back as a different frame kind (text vs binary)")]
    FrameKindMismatch,

        #[error("peer closed the connection before replying")]
    PeerClosed,

    #[error("no reply within {timeout_ms} ms")]
    ReplyTimeout { timeout_ms: u64 },

    #[error("connection {state} after burst of {sent} messages")]
    Degraded { sent: usize, state: ConnState },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Settings and context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BurstSettings {
    pub messages: usize,
    pub small_size: usize,
    pub large_size: usize,
    pub settle_window: Duration,
}

impl Default for BurstSettings {
    fn default() -> Self {
        Self {
            messages: 500,
            small_size: 50,
            large_size: 50_000,
            settle_window: DEFAULT_SETTLE_WINDOW,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub connect_timeout: Duration,
    /// `None` waits for an echo forever.
    pub reply_timeout: Option<Duration>,
    pub burst: BurstSettings,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: None,
            burst: BurstSettings::default(),
        }
    }
}

/// Where an in-flight scenario currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Pending,
    AwaitingOpen,
    AwaitingReply,
    Settling,
    Done,
}

/// What a scenario gets from the orchestrator.
pub struct TestContext {
    pub host: String,
    pub port: u16,
    transport: Arc<dyn Transport>,
    settings: ScenarioSettings,
    phase: Mutex<Phase>,
}

impl TestContext {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        transport: Arc<dyn Transport>,
        settings: ScenarioSettings,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            settings,
            phase: Mutex::new(Phase::Pending),
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    pub fn endpoint(&self, tls: bool) -> Result<Endpoint, TestFailure> {
        if tls {
            Ok(Endpoint::tls(self.host.clone(), self.port)?)
        } else {
            Ok(Endpoint::plain(self.host.clone(), self.port))
        }
    }

    pub fn validator(&self) -> EchoValidator {
        EchoValidator::new(self.settings.reply_timeout, self.settings.burst.settle_window)
    }

    pub fn enter(&self, phase: Phase) {
        if let Ok(mut current) = self.phase.lock() {
            debug!(from = ?*current, to = ?phase, "scenario phase");
            *current = phase;
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.lock().map(|p| *p).unwrap_or(Phase::Pending)
    }

    /// Probe `endpoint` and hand back the connection only if it is OPEN.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TestFailure> {
        self.enter(Phase::AwaitingOpen);
        let probe = ConnectionProbe::new(Arc::clone(&self.transport), self.settings.connect_timeout);
        match probe.open(endpoint).await {
            ProbeOutcome::Ready(conn) if conn.state() == ConnState::Open => Ok(conn),
            ProbeOutcome::Ready(mut conn) => {
                let state = conn.state();
                conn.close().await;
                Err(TestFailure::ConnectError {
                    endpoint: endpoint.to_string(),
                    reason: format!("reported ready but state is {}", state),
                })
            }
            ProbeOutcome::TimedOut => Err(TestFailure::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout_ms: probe.timeout().as_millis() as u64,
            }),
            ProbeOutcome::ConnectError(reason) => Err(TestFailure::ConnectError {
                endpoint: endpoint.to_string(),
                reason,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// One self-contained regression scenario.
#[async_trait::async_trait]
pub trait TestCase: Send + Sync {
    async fn run(&self, ctx: &TestContext) -> Result<(), TestFailure>;
}

/// The canonical scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Availability,
    BasicConnect { tls: bool },
    RequestReply { tls: bool, size: MessageSize },
    IntensiveTransfer,
}

#[async_trait::async_trait]
impl TestCase for Scenario {
    async fn run(&self, ctx: &TestContext) -> Result<(), TestFailure> {
        let result = match *self {
            Scenario::Availability => availability::run(ctx),
            Scenario::BasicConnect { tls } => connect::run(ctx, tls).await,
            Scenario::RequestReply { tls, size } => echo::run(ctx, tls, size).await,
            Scenario::IntensiveTransfer => burst::run(ctx).await,
        };
        if result.is_ok() {
            ctx.enter(Phase::Done);
        }
        result
    }
}

/// The full regression suite, in execution order.
pub fn default_suite() -> Result<Registry, RegistryError> {
    let suite: [(&str, Scenario); 9] = [
        ("Check if Websocket is available", Scenario::Availability),
        ("Websocket basic connection test", Scenario::BasicConnect { tls: false }),
        ("Websocket basic TLS connection test", Scenario::BasicConnect { tls: true }),
        (
            "Websocket request/reply test",
            Scenario::RequestReply { tls: false, size: MessageSize::Short },
        ),
        (
            "Websocket TLS request/reply test",
            Scenario::RequestReply { tls: true, size: MessageSize::Short },
        ),
        (
            "Websocket big message test",
            Scenario::RequestReply { tls: false, size: MessageSize::Big },
        ),
        (
            "Websocket really big message test",
            Scenario::RequestReply { tls: false, size: MessageSize::ReallyBig },
        ),
        (
            "Websocket really big message test (2)",
            Scenario::RequestReply { tls: false, size: MessageSize::ReallyBig2 },
        ),
        ("Websocket intensive data transfer test", Scenario::IntensiveTransfer),
    ];

    let mut registry = Registry::new();
    for (name, scenario) in suite {
        registry.register(name, Arc::new(scenario))?;
    }
    Ok(registry)
}
