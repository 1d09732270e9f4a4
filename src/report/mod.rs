//! Log event stream and run reports.
//!
//! The sequencer narrates a run as an ordered stream of [`LogEvent`]s. Where
//! they end up is the caller's business: a [`LogSink`] can print them, keep
//! them in memory or forward them over a channel.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::sequencer::SequencerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogStatus {
    Info,
    Ok,
    Error,
    FinalOk,
}

impl LogStatus {
    /// `ok` and `final-ok` lines carry no time delta.
    pub fn is_stamped(self) -> bool {
        !matches!(self, LogStatus::Ok | LogStatus::FinalOk)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            LogStatus::Info => "info",
            LogStatus::Ok => "ok",
            LogStatus::Error => "error",
            LogStatus::FinalOk => "final-ok",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub status: LogStatus,
    pub message: String,
    /// Milliseconds since the previous stamped event. Diagnostic only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_ms: Option<u64>,
}

/// Receiver of the event stream.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &LogEvent);
}

/// Stamps events with their delta, forwards them to a sink and keeps a copy.
pub struct EventLog {
    sink: Arc<dyn LogSink>,
    last_stamp: Option<Instant>,
    history: Vec<LogEvent>,
}

impl EventLog {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            last_stamp: None,
            history: Vec::new(),
        }
    }

    pub fn log(&mut self, status: LogStatus, message: impl Into<String>) {
        let delta_ms = if status.is_stamped() {
            let now = Instant::now();
            let delta = self
                .last_stamp
                .map(|prev| now.duration_since(prev).as_millis() as u64)
                .unwrap_or(0);
            self.last_stamp = Some(now);
            Some(delta)
        } else {
            None
        };

        let event = LogEvent {
            status,
            message: message.into(),
            delta_ms,
        };
        self.sink.emit(&event);
        self.history.push(event);
    }

    pub fn history(&self) -> &[LogEvent] {
        &self.history
    }

    pub fn into_history(self) -> Vec<LogEvent> {
        self.history
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Keeps every event; cheap to clone and inspect from tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, event: &LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Prints one line per event to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn emit(&self, event: &LogEvent) {
        println!("{}", format_event(event));
    }
}

/// Forwards events to an external reporter task.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<LogEvent>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, event: &LogEvent) {
        // A reporter that went away is not our problem.
        let _ = self.0.send(event.clone());
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _event: &LogEvent) {}
}

pub fn format_event(event: &LogEvent) -> String {
    match event.delta_ms {
        Some(delta) => format!("{:>8} | Diff {}: {}", event.status, delta, event.message),
        None => format!("{:>8} | {}", event.status, event.message),
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Everything a finished (or halted) run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub target: String,
    pub outcome: SequencerState,
    /// Names of the tests that were dispatched, in order.
    pub executed: Vec<String>,
    pub events: Vec<LogEvent>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, SequencerState::Finished)
    }
}

/// One-line human summary of a run.
pub fn format_summary(report: &RunReport) -> String {
    let ran = report.executed.len();
    let plural = if ran == 1 { "" } else { "s" };
    match &report.outcome {
        SequencerState::Finished => {
            format!("PASS: {} test{} against {} finished OK", ran, plural, report.target)
        }
        SequencerState::Stopped(cause) => {
            format!("FAIL: {} ({} test{} dispatched against {})", cause, ran, plural, report.target)
        }
        SequencerState::Error(defect) => format!("ERROR: {}", defect),
        SequencerState::Idle | SequencerState::Running => {
            format!("INCOMPLETE: run against {} did not reach a terminal state", report.target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{SequencingDefect, StopCause};
    use std::time::Duration;

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&LogStatus::FinalOk).unwrap(), "\"final-ok\"");
        assert_eq!(serde_json::to_string(&LogStatus::Info).unwrap(), "\"info\"");
        assert_eq!(format!("{:>8}", LogStatus::Ok), "      ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_skip_ok_lines_and_reset() {
        let sink = MemorySink::new();
        let mut log = EventLog::new(Arc::new(sink.clone()));

        log.log(LogStatus::Info, "first");
        tokio::time::advance(Duration::from_millis(40)).await;
        log.log(LogStatus::Ok, "done");
        tokio::time::advance(Duration::from_millis(60)).await;
        log.log(LogStatus::Info, "second");
        tokio::time::advance(Duration::from_millis(5)).await;
        log.log(LogStatus::Error, "boom");
        log.log(LogStatus::FinalOk, "never mind");

        let deltas: Vec<Option<u64>> = sink.events().iter().map(|e| e.delta_ms).collect();
        assert_eq!(deltas, vec![Some(0), None, Some(100), Some(5), None]);
        assert_eq!(log.history().len(), 5);
    }

    #[test]
    fn test_format_event() {
        let stamped = LogEvent {
            status: LogStatus::Info,
            message: "Running TEST-0: A".into(),
            delta_ms: Some(12),
        };
        assert_eq!(format_event(&stamped), "    info | Diff 12: Running TEST-0: A");
        let plain = LogEvent {
            status: LogStatus::FinalOk,
            message: "All regression tests finished OK!".into(),
            delta_ms: None,
        };
        assert!(format_event(&plain).ends_with("| All regression tests finished OK!"));
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        let mut log = EventLog::new(Arc::new(sink));
        log.log(LogStatus::Info, "hello");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.message, "hello");
    }

    fn report(outcome: SequencerState, executed: &[&str]) -> RunReport {
        RunReport {
            run_id: uuid::Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            target: "localhost:44010".into(),
            outcome,
            executed: executed.iter().map(|s| s.to_string()).collect(),
            events: Vec::new(),
        }
    }

    #[test]
    fn test_summary_pass() {
        let r = report(SequencerState::Finished, &["A", "B"]);
        assert!(r.passed());
        assert_eq!(format_summary(&r), "PASS: 2 tests against localhost:44010 finished OK");
    }

    #[test]
    fn test_summary_failure_names_test() {
        let r = report(
            SequencerState::Stopped(StopCause::Failed {
                index: 1,
                name: "B".into(),
                reason: "connect to ws://localhost:44010 timed out after 3000 ms".into(),
            }),
            &["A", "B"],
        );
        assert!(!r.passed());
        let summary = format_summary(&r);
        assert!(summary.starts_with("FAIL: TEST-1 B failed"));
        assert!(summary.contains("timed out"));
    }

    #[test]
    fn test_summary_defect_is_distinct() {
        let r = report(
            SequencerState::Error(SequencingDefect { index: 4, len: 3 }),
            &["A", "B", "C"],
        );
        assert!(format_summary(&r).starts_with("ERROR:"));
    }

    #[test]
    fn test_report_json_shape() {
        let r = report(SequencerState::Finished, &["A"]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"]["state"], "finished");
        assert_eq!(json["executed"][0], "A");
    }
}
