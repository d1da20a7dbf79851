//! Dependency-gated batch execution.
//!
//! The `DependencyRunner` refuses to start a task whose dependencies have
//! not succeeded in the current run; the `BatchRunner` drives an ordered
//! set of tasks through it, consulting the state ledger for idempotent
//! skips and accumulating a per-run report. Execution is strictly
//! sequential: tasks commonly mutate shared resources (the working
//! directory, a single manifest), so parallelism would race.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::{IndexEntry, TaskCatalog};
use crate::core::task::{ExecStatus, ExecutionResult, Task, TaskId};
use crate::error::Result;
use crate::exec::sequencer::Sequencer;
use crate::state::StateStore;
use crate::{rlog, rlog_debug};

/// Gates task execution on dependency success within the current run.
///
/// Only the in-memory results of the active run are consulted; a
/// dependency's success in a previous run does not satisfy the gate by
/// itself (the batch runner's skip path records ledger-satisfied tasks
/// into the current-run map first, which is how prior runs are honored).
pub struct DependencyRunner {
    sequencer: Sequencer,
}

impl DependencyRunner {
    pub fn new(sequencer: Sequencer) -> Self {
        Self { sequencer }
    }

    /// Run a task if every declared dependency has a `Success` result in
    /// `current`. A dependency with no result yields `DepNotRun`; one with
    /// a non-success result yields `DepFailed`. In both cases the task's
    /// process is never spawned.
    pub async fn run_with_deps(
        &self,
        task: &Task,
        current: &HashMap<TaskId, ExecutionResult>,
    ) -> ExecutionResult {
        for dep in &task.dependencies {
            match current.get(dep) {
                None => {
                    rlog_debug!("runner: {} blocked, {} not run", task.id, dep);
                    return gate_result(task, ExecStatus::DepNotRun);
                }
                Some(result) if !result.status.is_success() => {
                    rlog_debug!("runner: {} blocked, {} is {}", task.id, dep, result.status);
                    return gate_result(task, ExecStatus::DepFailed);
                }
                Some(_) => {}
            }
        }
        self.sequencer.run(task).await
    }
}

/// A gate decision: the task never started, so no attempt and no duration.
fn gate_result(task: &Task, status: ExecStatus) -> ExecutionResult {
    ExecutionResult::new(task.id.clone(), status, Duration::ZERO, 0)
}

/// Report for one `run_batch`/`run_directory` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Per-task results in execution order.
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    fn from_results(results: Vec<ExecutionResult>) -> Self {
        let passed = results.iter().filter(|r| r.status.is_success()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        }
    }
}

/// Drives an ordered set of tasks through the dependency runner.
pub struct BatchRunner<'a> {
    runner: DependencyRunner,
    store: &'a StateStore,
    force: bool,
}

impl<'a> BatchRunner<'a> {
    pub fn new(sequencer: Sequencer, store: &'a StateStore) -> Self {
        Self {
            runner: DependencyRunner::new(sequencer),
            store,
            force: false,
        }
    }

    /// Re-execute tasks even when the ledger already records their success.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run the given tasks in order.
    ///
    /// Does not fail fast: every task in the ordering is attempted, except
    /// that a task whose dependency failed or never ran is gated without
    /// spawning its process. A task already recorded in the ledger is
    /// skipped (unless forced) and still appears to dependents as a
    /// success. Genuine successes are written back to the ledger.
    ///
    /// # Errors
    /// Only a ledger write failure (environment-level) is an error; task
    /// failures are data in the summary.
    pub async fn run_batch(&self, tasks: &[Task]) -> Result<RunSummary> {
        let mut current: HashMap<TaskId, ExecutionResult> = HashMap::new();
        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            let result = if !self.force && self.store.has_succeeded(task.id.as_str()) {
                rlog!("skip {} (already completed)", task.id);
                ExecutionResult::skipped(task.id.clone())
            } else {
                let result = self.runner.run_with_deps(task, &current).await;
                rlog!(
                    "{} -> {} ({} attempts, {:.1}s)",
                    task.id,
                    result.status,
                    result.attempts,
                    result.duration_secs
                );
                if result.status.is_success() {
                    self.store.mark_success(task.id.as_str())?;
                }
                result
            };

            // Visible to every later task in this ordering before it runs.
            current.insert(task.id.clone(), result.clone());
            results.push(result);
        }

        Ok(RunSummary::from_results(results))
    }

    /// Run every cataloged task, ordered by ascending declared phase.
    ///
    /// Unknown phase sorts last; ties keep discovery order. Tasks are
    /// materialized from their script headers so timeout, retries, and the
    /// verification command are current.
    pub async fn run_directory(&self, catalog: &TaskCatalog) -> Result<RunSummary> {
        let ordered = order_by_phase(catalog.entries());
        let tasks: Vec<Task> = ordered
            .iter()
            .map(|entry| catalog.materialize(&entry.path))
            .collect();
        self.run_batch(&tasks).await
    }
}

/// Stable sort by phase: ascending, unknown last, discovery order preserved
/// within a phase.
fn order_by_phase(entries: &[IndexEntry]) -> Vec<&IndexEntry> {
    let mut ordered: Vec<&IndexEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.phase.map(u64::from).unwrap_or(u64::MAX));
    ordered
}
