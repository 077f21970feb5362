//! Session outcome and teardown reporting.

use crate::error::{SessionError, error_chain};
use std::fmt;

/// The five teardown steps, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    CloseRelay,
    StopCapture,
    ClosePlayback,
    DeleteListener,
    DeleteAgent,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::CloseRelay => "close_relay",
            TeardownStep::StopCapture => "stop_capture",
            TeardownStep::ClosePlayback => "close_playback",
            TeardownStep::DeleteListener => "delete_listener",
            TeardownStep::DeleteAgent => "delete_agent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// There was nothing to release.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    entries: Vec<(TeardownStep, StepOutcome)>,
}

impl TeardownReport {
    pub(crate) fn record(&mut self, step: TeardownStep, outcome: StepOutcome) {
        self.entries.push((step, outcome));
    }

    pub fn entries(&self) -> &[(TeardownStep, StepOutcome)] {
        &self.entries
    }

    pub fn outcome(&self, step: TeardownStep) -> Option<&StepOutcome> {
        self.entries
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (TeardownStep, &str)> {
        self.entries.iter().filter_map(|(step, outcome)| match outcome {
            StepOutcome::Failed(reason) => Some((*step, reason.as_str())),
            _ => None,
        })
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (step, outcome) in &self.entries {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match outcome {
                StepOutcome::Done => write!(f, "{step}=done")?,
                StepOutcome::Skipped => write!(f, "{step}=skipped")?,
                StepOutcome::Failed(reason) => write!(f, "{step}=failed ({reason})")?,
            }
        }
        Ok(())
    }
}

/// Everything a caller needs to know about one session run.
#[derive(Debug)]
pub struct SessionResult {
    pub outcome: Result<(), SessionError>,
    pub teardown: TeardownReport,
    pub agent_id: Option<String>,
    pub listener_id: Option<String>,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok() && self.teardown.all_succeeded()
    }

    /// A single line describing every failure, or `None` on success.
    pub fn failure_summary(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        let mut parts = Vec::new();
        if let Err(e) = &self.outcome {
            parts.push(format!("session failed at {}: {}", e.step(), error_chain(e)));
        }
        let failed: Vec<String> = self
            .teardown
            .failures()
            .map(|(step, reason)| format!("{step} ({reason})"))
            .collect();
        if !failed.is_empty() {
            parts.push(format!("teardown incomplete: {}", failed.join(", ")));
        }
        Some(parts.join("; "))
    }
}
