//! Task data model for the installation pipeline.
//!
//! Tasks are the discoverable units of work the orchestrator runs. Each
//! carries the metadata declared in its script header: ordering phase,
//! required variables, dependencies, timeout, retry budget, and an optional
//! verification command.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_RETRIES, DEFAULT_TIMEOUT_SECS};

/// Stable identifier for a task: its path relative to the source root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A discoverable unit of work.
///
/// Materialized by the catalog from a script's header lines; immutable for
/// the lifetime of one orchestration run and re-derived on each refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable key: path relative to the source root.
    pub id: TaskId,
    /// Ordering bucket for directory runs. Unknown phase sorts last.
    pub phase: Option<u32>,
    /// Variable names the script expects in its environment. Declared but
    /// not validated by the core.
    pub required_vars: BTreeSet<String>,
    /// Tasks that must succeed in the current run before this one starts.
    pub dependencies: BTreeSet<TaskId>,
    /// Per-attempt wall-clock budget, in seconds.
    pub timeout_secs: u64,
    /// Number of re-attempts after a failed first attempt.
    pub retries: u32,
    /// Optional post-execution verification command.
    pub test_command: Option<String>,
}

impl Task {
    /// Create a task with default metadata (unknown phase, no dependencies,
    /// default timeout and retry budget).
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            phase: None,
            required_vars: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            test_command: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl From<&str> for Task {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Terminal status of one task within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// Process (and verification, if any) succeeded.
    Success,
    /// Process exited non-success on every attempt.
    Failure,
    /// Deadline elapsed; the process was terminated. Not retried.
    Timeout,
    /// Process succeeded but the verification command failed. Not retried.
    TestFailed,
    /// A dependency had a non-success result in the current run.
    DepFailed,
    /// A dependency has no result in the current run.
    DepNotRun,
}

impl ExecStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecStatus::Success)
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecStatus::Success => write!(f, "success"),
            ExecStatus::Failure => write!(f, "failure"),
            ExecStatus::Timeout => write!(f, "timeout"),
            ExecStatus::TestFailed => write!(f, "test_failed"),
            ExecStatus::DepFailed => write!(f, "dep_failed"),
            ExecStatus::DepNotRun => write!(f, "dep_not_run"),
        }
    }
}

/// In-memory outcome of one task within the current run.
///
/// Discarded after the run's report is consumed; a success additionally
/// triggers a state-ledger write, which is the only part that persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub status: ExecStatus,
    /// Wall-clock duration of the last attempt only, not cumulative.
    pub duration_secs: f64,
    /// Attempts actually made. Zero means the task was skipped because a
    /// prior run already recorded its success.
    pub attempts: u32,
}

impl ExecutionResult {
    pub fn new(task_id: TaskId, status: ExecStatus, duration: Duration, attempts: u32) -> Self {
        Self {
            task_id,
            status,
            duration_secs: duration.as_secs_f64(),
            attempts,
        }
    }

    /// Result recorded for a task satisfied by the state ledger without
    /// re-execution. Dependents observe it as a success.
    pub fn skipped(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: ExecStatus::Success,
            duration_secs: 0.0,
            attempts: 0,
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.attempts == 0 && self.status.is_success()
    }
}
