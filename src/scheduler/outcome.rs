//! Terminal outcome of one dispatched execution.

use std::fmt;

use crate::pipeline::{ProcessError, ProcessOutcome};

/// How a dispatched execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Claimed, executed and recorded as completed.
    Completed,
    /// Another claimant won, or the milestone was no longer eligible.
    ClaimLost,
    /// Claimed and executed; the work failed and the failure was recorded.
    ExecutionFailed { error: String, dead_lettered: bool },
    /// The claim or the record step hit an infrastructure error. Nothing
    /// was committed for that step.
    InfrastructureError(String),
}

impl DispatchOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::ClaimLost => "claim_lost",
            DispatchOutcome::ExecutionFailed {
                dead_lettered: true,
                ..
            } => "dead_lettered",
            DispatchOutcome::ExecutionFailed { .. } => "failed",
            DispatchOutcome::InfrastructureError(_) => "error",
        }
    }

    /// Whether the stage work ran and its result was recorded.
    pub fn executed(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Completed | DispatchOutcome::ExecutionFailed { .. }
        )
    }

    /// Returns true if the stage ended up completed.
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Completed)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::ExecutionFailed { error, .. } => {
                write!(f, "{}: {}", self.label(), error)
            }
            DispatchOutcome::InfrastructureError(error) => write!(f, "error: {}", error),
            _ => f.write_str(self.label()),
        }
    }
}

impl From<Result<ProcessOutcome, ProcessError>> for DispatchOutcome {
    fn from(result: Result<ProcessOutcome, ProcessError>) -> Self {
        match result {
            Ok(ProcessOutcome::Completed) => DispatchOutcome::Completed,
            Ok(ProcessOutcome::ClaimLost) => DispatchOutcome::ClaimLost,
            Ok(ProcessOutcome::Failed {
                error,
                dead_lettered,
            }) => DispatchOutcome::ExecutionFailed {
                error,
                dead_lettered,
            },
            Err(e) => DispatchOutcome::InfrastructureError(e.to_string()),
        }
    }
}
