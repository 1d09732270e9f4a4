//! Sequential test orchestration.
//!
//! [`Sequencer`] is the synchronous state machine: it owns one run's
//! [`RunState`], decides which descriptor runs next and narrates every
//! decision to the event log. [`runner::Runner`] drives it asynchronously.
//!
//! ```text
//! IDLE --start--> RUNNING --+--> FINISHED   all enabled tests passed
//!                           +--> STOPPED    a test failed, or the run was cancelled
//!                           +--> ERROR      advance() called past the end
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::report::{EventLog, LogStatus};
use crate::scenarios::{Phase, TestCase};

pub mod runner;

pub use runner::{RunHandle, Runner};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a test named '{0}' is already registered")]
    DuplicateName(String),

    #[error("no test named '{0}'")]
    UnknownTest(String),
}

/// `advance()` was called beyond the end of the registry. This is a bug in
/// a test implementation, not a test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[error("regression test is calling to next test too many times: {index}")]
pub struct SequencingDefect {
    pub index: usize,
    pub len: usize,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Entry {
    name: String,
    enabled: bool,
    handler: Arc<dyn TestCase>,
}

/// The ordered list of available tests and their selection.
///
/// Names are unique because selection addresses tests by name.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a test, enabled.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TestCase>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.entries.push(Entry {
            name,
            enabled: true,
            handler,
        });
        Ok(())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| RegistryError::UnknownTest(name.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Enable exactly the named tests.
    pub fn select_only<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), RegistryError> {
        for name in names {
            if !self.entries.iter().any(|e| e.name == name.as_ref()) {
                return Err(RegistryError::UnknownTest(name.as_ref().to_string()));
            }
        }
        for entry in &mut self.entries {
            entry.enabled = names.iter().any(|n| n.as_ref() == entry.name);
        }
        Ok(())
    }

    pub fn invert_selection(&mut self) {
        for entry in &mut self.entries {
            entry.enabled = !entry.enabled;
        }
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.enabled)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the registry into descriptors for one run.
    ///
    /// Later selection changes do not affect a run already in progress.
    pub fn snapshot(&self) -> Vec<TestDescriptor> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, e)| TestDescriptor {
                id,
                name: e.name.clone(),
                enabled: e.enabled,
                handler: Arc::clone(&e.handler),
            })
            .collect()
    }
}

/// One test as seen by a single run. `id` is its position in the registry.
#[derive(Clone)]
pub struct TestDescriptor {
    pub id: usize,
    pub name: String,
    pub enabled: bool,
    pub handler: Arc<dyn TestCase>,
}

impl fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Per-run mutable state. Owned by exactly one [`Sequencer`].
#[derive(Debug)]
pub struct RunState {
    /// `None` until the first advance.
    pub current: Option<usize>,
    pub stopped: bool,
    pub registry: Vec<TestDescriptor>,
}

impl RunState {
    pub fn new(registry: Vec<TestDescriptor>) -> Self {
        Self {
            current: None,
            stopped: false,
            registry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum StopCause {
    Failed {
        index: usize,
        name: String,
        reason: String,
    },
    Cancelled {
        index: Option<usize>,
        phase: Option<Phase>,
    },
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Failed {
                index,
                name,
                reason,
            } => write!(f, "TEST-{} {} failed: {}", index, name, reason),
            StopCause::Cancelled {
                index: Some(index),
                phase,
            } => match phase {
                Some(phase) => write!(f, "run cancelled during TEST-{} ({:?})", index, phase),
                None => write!(f, "run cancelled during TEST-{}", index),
            },
            StopCause::Cancelled { index: None, .. } => write!(f, "run cancelled before start"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    Running,
    Finished,
    Stopped(StopCause),
    Error(SequencingDefect),
}

/// What the driver has to do after a sequencer transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the descriptor at this index.
    Dispatch(usize),
    Finished,
    Defect(SequencingDefect),
    /// The run is stopped; nothing happened.
    Halted,
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

pub struct Sequencer {
    run: RunState,
    state: SequencerState,
    log: EventLog,
}

impl Sequencer {
    pub fn new(registry: Vec<TestDescriptor>, log: EventLog) -> Self {
        Self {
            run: RunState::new(registry),
            state: SequencerState::Idle,
            log,
        }
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn current_index(&self) -> Option<usize> {
        self.run.current
    }

    pub fn is_stopped(&self) -> bool {
        self.run.stopped
    }

    pub fn descriptor(&self, index: usize) -> Option<&TestDescriptor> {
        self.run.registry.get(index)
    }

    /// Hand back the event log; its history is the run's narration.
    pub fn into_log(self) -> EventLog {
        self.log
    }

    /// IDLE -> RUNNING, then pick the first enabled test.
    pub fn start(&mut self) -> Step {
        if self.state != SequencerState::Idle {
            debug!(state = ?self.state, "start ignored, sequencer already used");
            return Step::Halted;
        }
        self.state = SequencerState::Running;
        self.run.current = None;
        self.advance()
    }

    /// The test at the current index succeeded; move on.
    ///
    /// Disabled tests are skipped in the same call, silently. Calling this on
    /// a stopped run does nothing at all.
    pub fn advance(&mut self) -> Step {
        if self.run.stopped {
            return Step::Halted;
        }

        if let Some(prev) = self.run.current {
            if let Some(desc) = self.run.registry.get(prev) {
                let line = format!("TEST-{} {}: OK", prev, desc.name);
                self.log.log(LogStatus::Ok, line);
            }
        }

        let len = self.run.registry.len();
        loop {
            let next = self.run.current.map_or(0, |i| i + 1);
            self.run.current = Some(next);

            if next == len {
                info!(tests = len, "all regression tests finished");
                self.log.log(LogStatus::FinalOk, "All regression tests finished OK!");
                self.state = SequencerState::Finished;
                return Step::Finished;
            }
            if next > len {
                let defect = SequencingDefect { index: next, len };
                error!(index = next, len, "advance called past the end of the registry");
                self.log.log(LogStatus::Error, defect.to_string());
                self.run.stopped = true;
                self.state = SequencerState::Error(defect);
                return Step::Defect(defect);
            }

            let desc = &self.run.registry[next];
            if !desc.enabled {
                continue;
            }

            let line = format!("Running TEST-{}: {}", next, desc.name);
            self.log.log(LogStatus::Info, line);
            return Step::Dispatch(next);
        }
    }

    /// The test at `index` failed. Halts the run. Returns `false` if the
    /// report was ignored (stale index or run already stopped).
    pub fn fail(&mut self, index: usize, reason: impl Into<String>) -> bool {
        if self.run.stopped || self.run.current != Some(index) {
            debug!(index, current = ?self.run.current, "ignoring failure report");
            return false;
        }
        let Some(desc) = self.run.registry.get(index) else {
            return false;
        };
        let name = desc.name.clone();
        let reason = reason.into();

        self.log
            .log(LogStatus::Error, format!("TEST-{} {}: {}", index, name, reason));
        self.run.stopped = true;
        self.state = SequencerState::Stopped(StopCause::Failed {
            index,
            name,
            reason,
        });
        true
    }

    /// External stop. Whatever is in flight will be ignored when it reports.
    pub fn cancel(&mut self, phase: Option<Phase>) -> bool {
        if self.run.stopped {
            return false;
        }
        let index = self.run.current.filter(|i| *i < self.run.registry.len());
        let cause = StopCause::Cancelled { index, phase };
        self.log.log(LogStatus::Error, cause.to_string());
        self.run.stopped = true;
        self.state = SequencerState::Stopped(cause);
        true
    }
}
