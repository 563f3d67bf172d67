//! Shared deterministic types for the iteration loop.
//!
//! These types are the contract between the invoker, the classifier, the
//! usage accumulator and the loop controller. They carry no I/O handles.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::usage::TokenUsage;

/// Outcome classification for one agent invocation.
///
/// Exactly one status is produced per invocation. Process-level failures
/// (`Timeout`, `ProcessError`) are decided before any text is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Progress was made but the plan is not finished.
    Improved,
    /// The agent declared the whole plan done.
    Completed,
    /// The process succeeded but neither marker pair was found.
    MissingMarker,
    /// The deadline expired and the process was killed.
    Timeout,
    /// Launch failure, abnormal exit, or I/O error on the child.
    ProcessError,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Improved => "improved",
            RunStatus::Completed => "completed",
            RunStatus::MissingMarker => "missing_marker",
            RunStatus::Timeout => "timeout",
            RunStatus::ProcessError => "process_error",
        }
    }

    /// `Timeout` and `ProcessError` are counted as errors by the loop.
    pub fn is_error(self) -> bool {
        matches!(self, RunStatus::Timeout | RunStatus::ProcessError)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited with status 0.
    Success,
    /// Could not launch, exited non-zero, or the output channel failed.
    Failed { code: Option<i32> },
    /// Killed after the deadline expired.
    TimedOut,
    /// Killed because an interrupt was received.
    Cancelled,
}

/// Result of one agent subprocess run.
///
/// Produced per call by the executor and consumed by the classifier and
/// accumulator within the same iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub exit: ProcessExit,
    /// Agent text extracted from stdout (the part that is scanned for markers).
    pub text: String,
    /// Usage metadata reported by the agent, if any.
    pub usage: Option<TokenUsage>,
    /// Human-readable failure description for non-success exits.
    pub error: Option<String>,
    pub duration: Duration,
}

impl InvocationResult {
    /// Successful exit with the given extracted text.
    pub fn success(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit: ProcessExit::Success,
            text: text.into(),
            usage: None,
            error: None,
            duration,
        }
    }

    /// Failure that never reached a successful exit.
    pub fn failed(exit: ProcessExit, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit,
            text: String::new(),
            usage: None,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.exit == ProcessExit::Cancelled
    }
}

/// Classified outcome plus extracted marker content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: RunStatus,
    /// Text strictly between the matched markers, trimmed.
    pub message: Option<String>,
}

impl Classification {
    pub fn new(status: RunStatus, message: Option<String>) -> Self {
        Self { status, message }
    }
}
