use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a job.
///
/// A job is created `READY`, becomes `ACTIVE` once its first task is
/// dispatched and stalls in `CONFIRM` while a canary task awaits operator
/// confirmation. `COMPLETED` and `CANCELLED` are terminal; a `FAILED` job can
/// be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Ready,
    Active,
    Confirm,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states freeze the job: no dispatch, no state changes.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled)
    }

    /// Whether the job is currently executing tasks.
    pub fn is_running(self) -> bool {
        matches!(self, JobState::Active | JobState::Confirm)
    }

    /// Whether new tasks may be dispatched for a job in this state.
    pub fn accepts_dispatch(self) -> bool {
        matches!(self, JobState::Ready | JobState::Active | JobState::Confirm)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Ready => write!(f, "READY"),
            JobState::Active => write!(f, "ACTIVE"),
            JobState::Confirm => write!(f, "CONFIRM"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Lifecycle of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created, not dispatched yet.
    Ready,
    /// At least one predecessor has not completed.
    Blocked,
    /// Processor invoked, waiting for the outcome.
    Active,
    /// Canary task succeeded and waits for operator confirmation.
    Confirm,
    /// Confirmed canary task, paused right before fan-out.
    Suspended,
    Completed,
    /// The target refused the work; the operator can fix and resubmit.
    Rejected,
    Failed,
    Timeout,
}

impl TaskState {
    pub fn is_succeeded(self) -> bool {
        self == TaskState::Completed
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Rejected | TaskState::Timeout)
    }

    /// States the expiry sweep may force into `TIMEOUT`.
    pub fn is_pending(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Blocked | TaskState::Active)
    }

    /// States a task may be dispatched from (blocking is checked separately).
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Blocked)
    }

    /// States a processor or an external report may set directly. The
    /// remaining states are owned by the engine.
    pub fn is_reportable(self) -> bool {
        matches!(
            self,
            TaskState::Active
                | TaskState::Completed
                | TaskState::Rejected
                | TaskState::Failed
                | TaskState::Timeout
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Ready => write!(f, "READY"),
            TaskState::Blocked => write!(f, "BLOCKED"),
            TaskState::Active => write!(f, "ACTIVE"),
            TaskState::Confirm => write!(f, "CONFIRM"),
            TaskState::Suspended => write!(f, "SUSPENDED"),
            TaskState::Completed => write!(f, "COMPLETED"),
            TaskState::Rejected => write!(f, "REJECTED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Severity of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}
