//! Async driver for the [`Sequencer`].
//!
//! The runner owns the loop the sequencer itself does not: it defers each
//! dispatch, runs the handler on its own task, turns the handler's result
//! into exactly one `advance()` or `fail()`, and watches the stop handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Registry, Sequencer, SequencerState, Step};
use crate::report::{EventLog, LogSink, RunReport};
use crate::scenarios::{ScenarioSettings, TestContext, TestFailure};
use crate::transport::Transport;

/// Pause between a dispatch decision and the handler starting.
pub const DEFAULT_DISPATCH_DELAY: Duration = Duration::from_millis(10);

/// External stop switch for a run in progress.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    token: CancellationToken,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Outcome {
    Passed,
    Failed(String),
    Cancelled,
}

pub struct Runner {
    transport: Arc<dyn Transport>,
    settings: ScenarioSettings,
    dispatch_delay: Duration,
}

impl Runner {
    pub fn new(transport: Arc<dyn Transport>, settings: ScenarioSettings) -> Self {
        Self {
            transport,
            settings,
            dispatch_delay: DEFAULT_DISPATCH_DELAY,
        }
    }

    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    /// Run every enabled test of `registry` against `host:port`, one at a
    /// time, until the suite finishes, a test fails or `handle` is stopped.
    ///
    /// Each call works on its own snapshot of the registry.
    pub async fn run(
        &self,
        registry: &Registry,
        host: &str,
        port: u16,
        sink: Arc<dyn LogSink>,
        handle: &RunHandle,
    ) -> RunReport {
        let run_id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let target = format!("{}:{}", host, port);

        // The caller's sink sees events live; the log's history feeds the report.
        let log = EventLog::new(sink);
        let mut seq = Sequencer::new(registry.snapshot(), log);
        let mut executed = Vec::new();

        info!(%run_id, %target, tests = registry.len(), "starting regression run");

        let mut step = if handle.is_stopped() {
            seq.cancel(None);
            Step::Halted
        } else {
            seq.start()
        };

        while let Step::Dispatch(index) = step {
            let Some(desc) = seq.descriptor(index).cloned() else {
                break;
            };
            executed.push(desc.name.clone());

            let ctx = Arc::new(TestContext::new(
                host,
                port,
                Arc::clone(&self.transport),
                self.settings.clone(),
            ));

            match self.dispatch(index, &desc.name, desc.handler, &ctx, handle).await {
                Outcome::Passed => step = seq.advance(),
                Outcome::Failed(reason) => {
                    warn!(test = %desc.name, index, %reason, "regression test failed");
                    seq.fail(index, reason);
                    step = Step::Halted;
                }
                Outcome::Cancelled => {
                    seq.cancel(Some(ctx.phase()));
                    step = Step::Halted;
                }
            }
        }

        let outcome = seq.state().clone();
        match &outcome {
            SequencerState::Finished => info!(%run_id, executed = executed.len(), "run finished"),
            other => warn!(%run_id, outcome = ?other, "run did not finish"),
        }

        RunReport {
            run_id,
            started_at,
            target,
            outcome,
            executed,
            events: seq.into_log().into_history(),
        }
    }

    async fn dispatch(
        &self,
        index: usize,
        name: &str,
        handler: Arc<dyn crate::scenarios::TestCase>,
        ctx: &Arc<TestContext>,
        handle: &RunHandle,
    ) -> Outcome {
        let (tx, rx) = oneshot::channel::<Result<(), TestFailure>>();
        let delay = self.dispatch_delay;
        let task_ctx = Arc::clone(ctx);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = handler.run(&task_ctx).await;
            // Nobody listening means the run was stopped.
            let _ = tx.send(result);
        });
        let abort = task.abort_handle();

        tokio::select! {
            result = rx => match result {
                Ok(Ok(())) => Outcome::Passed,
                Ok(Err(failure)) => Outcome::Failed(failure.to_string()),
                Err(_) => {
                    // Sender dropped without a result: the handler panicked.
                    let reason = match task.await {
                        Err(e) if e.is_panic() => format!("test panicked: {}", panic_message(e)),
                        _ => "test ended without reporting a result".to_string(),
                    };
                    Outcome::Failed(reason)
                }
            },
            _ = handle.token.cancelled() => {
                info!(test = %name, index, phase = ?ctx.phase(), "run stopped, abandoning test");
                abort.abort();
                Outcome::Cancelled
            }
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
