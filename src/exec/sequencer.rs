//! Single-task execution under timeout, retry, and verification.
//!
//! The sequencer runs one task script per call, enforcing the task's
//! per-attempt deadline, retrying failed attempts up to the declared budget,
//! and evaluating the optional verification command after a successful
//! process result. Every terminal outcome is returned as data; the
//! sequencer never consults dependencies or the state ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use crate::config::Config;
use crate::core::task::{ExecStatus, ExecutionResult, Task};
use crate::error::{Error, Result};
use crate::{rlog_debug, rlog_warn};

/// Outcome of one process attempt, before retry policy is applied.
enum Attempt {
    Success,
    Failed(String),
    /// Deadline elapsed; the process was terminated. Terminal, not retried.
    TimedOut,
}

/// Executes one task at a time on the caller's control flow.
///
/// Tasks run as `<shell> <script>` with the project root as working
/// directory and the configured variable map merged into the environment.
/// The verification command runs as `<shell> -c <cmd>`.
pub struct Sequencer {
    shell: PathBuf,
    project_root: PathBuf,
    source_root: PathBuf,
    env: BTreeMap<String, String>,
    retry_delay: Duration,
    grace_period: Duration,
}

impl Sequencer {
    /// Create a sequencer for tasks under `source_root`, executing with the
    /// project root as working directory.
    ///
    /// # Errors
    /// Returns an error if the configured shell interpreter cannot be found.
    pub fn new(config: &Config, project_root: PathBuf, source_root: PathBuf) -> Result<Self> {
        let shell =
            which::which(&config.shell).map_err(|_| Error::ShellNotFound(config.shell.clone()))?;
        Ok(Self {
            shell,
            project_root,
            source_root,
            env: config.vars.clone(),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            grace_period: Duration::from_secs(config.grace_secs),
        })
    }

    /// Override the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the grace period between graceful and forceful termination.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run one task to a terminal status.
    ///
    /// The returned duration covers the last attempt only, not the sum of
    /// all attempts, and `attempts` is the count actually made.
    pub async fn run(&self, task: &Task) -> ExecutionResult {
        let deadline = task.timeout();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if attempts > 1 {
                rlog_debug!(
                    "sequencer: {} attempt {} after {:?} delay",
                    task.id,
                    attempts,
                    self.retry_delay
                );
                sleep(self.retry_delay).await;
            }

            let started = Instant::now();
            let attempt = self.attempt(task, deadline).await;
            let duration = started.elapsed();

            match attempt {
                Attempt::Success => {
                    if let Some(test) = &task.test_command {
                        if !self.verify(test).await {
                            // Verification failure is terminal even with
                            // retries remaining.
                            rlog_warn!("sequencer: {} verification failed", task.id);
                            return ExecutionResult::new(
                                task.id.clone(),
                                ExecStatus::TestFailed,
                                duration,
                                attempts,
                            );
                        }
                    }
                    return ExecutionResult::new(
                        task.id.clone(),
                        ExecStatus::Success,
                        duration,
                        attempts,
                    );
                }
                Attempt::TimedOut => {
                    rlog_warn!(
                        "sequencer: {} timed out after {:?} (attempt {})",
                        task.id,
                        deadline,
                        attempts
                    );
                    return ExecutionResult::new(
                        task.id.clone(),
                        ExecStatus::Timeout,
                        duration,
                        attempts,
                    );
                }
                Attempt::Failed(reason) => {
                    if attempts > task.retries {
                        rlog_warn!(
                            "sequencer: {} failed after {} attempts: {}",
                            task.id,
                            attempts,
                            reason
                        );
                        return ExecutionResult::new(
                            task.id.clone(),
                            ExecStatus::Failure,
                            duration,
                            attempts,
                        );
                    }
                    rlog_debug!("sequencer: {} attempt {} failed: {}", task.id, attempts, reason);
                }
            }
        }
    }

    /// Spawn the task's script and wait for it under the deadline.
    async fn attempt(&self, task: &Task, deadline: Duration) -> Attempt {
        let script = self.source_root.join(task.id.as_str());
        let mut child = match Command::new(&self.shell)
            .arg(&script)
            .current_dir(&self.project_root)
            .envs(&self.env)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => return Attempt::Failed(format!("spawn failed: {}", err)),
        };

        match timeout(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => Attempt::Success,
            Ok(Ok(status)) => Attempt::Failed(format!("exited with {}", status)),
            Ok(Err(err)) => Attempt::Failed(format!("wait failed: {}", err)),
            Err(_) => {
                self.terminate(&mut child).await;
                Attempt::TimedOut
            }
        }
    }

    /// Two-stage termination: ask politely, wait out the grace period, then
    /// kill. The child is reaped either way so no zombie is left behind.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SIGTERM lets the script run its cleanup traps.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if timeout(self.grace_period, child.wait()).await.is_err() {
            // Still alive after the grace period.
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }

    /// Evaluate the task's verification command; any non-success result
    /// (including a spawn failure) counts as failed verification.
    async fn verify(&self, test_command: &str) -> bool {
        Command::new(&self.shell)
            .arg("-c")
            .arg(test_command)
            .current_dir(&self.project_root)
            .envs(&self.env)
            .stdin(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("shell", &self.shell)
            .field("project_root", &self.project_root)
            .field("source_root", &self.source_root)
            .finish()
    }
}
