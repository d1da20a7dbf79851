//! Best-effort background package prefetching.
//!
//! The prefetcher derives a package list from the enabled stack features
//! and warms a local cache in a concurrently scheduled job, so the install
//! pipeline finds layers already downloaded. It is deliberately decoupled
//! from orchestration correctness: per-package failures are logged and
//! counted but never abort the job, and the batch runner works the same
//! (if more slowly) when prefetching never started or failed entirely.
//!
//! The job communicates with the foreground only through a job-scoped log
//! file, atomic progress counters, and a handle that can be waited on or
//! cancelled — never through shared mutable task state.

mod cache;

pub use cache::PackageCache;

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Config, FeatureFlags};
use crate::error::{Error, Result};
use crate::{rlog, rlog_debug, rlog_warn};

/// Unique identifier for one prefetch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal state of a prefetch job as seen by `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job drained its package list.
    Completed {
        /// Packages attempted (successes and failures alike).
        attempted: usize,
        /// Attempts that failed to warm the cache.
        failed: usize,
    },
    /// The caller's wait deadline elapsed first; the job was stopped.
    TimedOut { attempted: usize, total: usize },
}

/// Derive the package list from the enabled stack features.
///
/// Pure and deterministic: the same flags always produce the same list, in
/// the same order, with no side effects.
pub fn package_list(features: &FeatureFlags) -> Vec<String> {
    let mut packages = vec![
        "nginx:1.27-alpine".to_string(),
        "php:8.3-fpm-alpine".to_string(),
    ];
    if features.database {
        packages.push("postgres:16-alpine".to_string());
    }
    if features.redis {
        packages.push("redis:7-alpine".to_string());
    }
    if features.node {
        packages.push("node:22-alpine".to_string());
    }
    if features.mailer {
        packages.push("axllent/mailpit:latest".to_string());
    }
    if features.queue {
        packages.push("php:8.3-cli-alpine".to_string());
    }
    packages
}

/// Live handle to one spawned prefetch job.
struct JobHandle {
    packages: Vec<String>,
    attempted: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    log_path: PathBuf,
}

/// Launches and tracks cache-warming jobs.
pub struct BackgroundPrefetcher {
    cache: PackageCache,
    /// Fetch command split into program + leading args; the package spec is
    /// appended as the final argument.
    fetch_command: Vec<String>,
    logs_dir: PathBuf,
    jobs: HashMap<JobId, JobHandle>,
}

impl BackgroundPrefetcher {
    pub fn new(config: &Config, project_root: &Path) -> Result<Self> {
        let cache = PackageCache::new(
            config.cache_dir()?,
            Duration::from_secs(config.cache_max_age_secs),
        );
        Ok(Self {
            cache,
            fetch_command: config
                .fetch_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            logs_dir: Config::job_logs_dir(project_root),
            jobs: HashMap::new(),
        })
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// Start one prefetch job for the given feature flags.
    ///
    /// Runs the implicit max-age sweep first, then spawns the job and
    /// returns immediately; the caller's pipeline is never blocked by it.
    pub fn start_for_config(&mut self, features: &FeatureFlags) -> Result<JobId> {
        let swept = self.cache.sweep_expired(&self.in_flight_packages());
        if swept > 0 {
            rlog!("prefetch: evicted {} expired cache entries", swept);
        }

        let packages = package_list(features);
        std::fs::create_dir_all(&self.logs_dir)?;

        let id = JobId::new();
        let log_path = self.logs_dir.join(format!("prefetch-{}.log", id.short()));
        let attempted = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        rlog!(
            "prefetch: job {} starting for {} packages",
            id.short(),
            packages.len()
        );
        let join = tokio::spawn(run_job(
            packages.clone(),
            self.cache.clone(),
            self.fetch_command.clone(),
            log_path.clone(),
            Arc::clone(&attempted),
            Arc::clone(&failed),
            cancel.clone(),
        ));

        self.jobs.insert(
            id,
            JobHandle {
                packages,
                attempted,
                failed,
                cancel,
                join,
                log_path,
            },
        );
        Ok(id)
    }

    pub fn is_running(&self, id: JobId) -> bool {
        self.jobs
            .get(&id)
            .map(|job| !job.join.is_finished())
            .unwrap_or(false)
    }

    /// Progress of a job: `(attempted, total)` packages.
    pub fn progress(&self, id: JobId) -> Result<(usize, usize)> {
        let job = self.jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        Ok((job.attempted.load(Ordering::Relaxed), job.packages.len()))
    }

    /// Path of a job's progress log.
    pub fn log_path(&self, id: JobId) -> Result<&Path> {
        let job = self.jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        Ok(&job.log_path)
    }

    /// Block up to `timeout` for the job to finish.
    ///
    /// On timeout the job is stopped (cancellation token first, abort as
    /// the forceful stage) and `TimedOut` is returned. Either way the
    /// handle is released; subsequent calls return `JobNotFound`.
    pub async fn wait(&mut self, id: JobId, timeout: Duration) -> Result<JobOutcome> {
        let mut job = self.jobs.remove(&id).ok_or(Error::JobNotFound(id))?;

        match tokio::time::timeout(timeout, &mut job.join).await {
            Ok(_) => Ok(JobOutcome::Completed {
                attempted: job.attempted.load(Ordering::Relaxed),
                failed: job.failed.load(Ordering::Relaxed),
            }),
            Err(_) => {
                rlog_warn!("prefetch: job {} wait timed out, stopping it", id.short());
                job.cancel.cancel();
                if tokio::time::timeout(Duration::from_millis(500), &mut job.join)
                    .await
                    .is_err()
                {
                    job.join.abort();
                }
                Ok(JobOutcome::TimedOut {
                    attempted: job.attempted.load(Ordering::Relaxed),
                    total: job.packages.len(),
                })
            }
        }
    }

    /// Stop a job without waiting for it and release its handle.
    pub fn cancel(&mut self, id: JobId) -> Result<()> {
        let job = self.jobs.remove(&id).ok_or(Error::JobNotFound(id))?;
        job.cancel.cancel();
        job.join.abort();
        rlog!("prefetch: job {} cancelled", id.short());
        Ok(())
    }

    /// Drop every cache entry not claimed by an in-flight job. Returns the
    /// number of entries removed.
    pub fn purge(&self) -> usize {
        self.cache.purge(&self.in_flight_packages())
    }

    /// Evict entries older than the max age, independent of any job.
    pub fn sweep_expired(&self) -> usize {
        self.cache.sweep_expired(&self.in_flight_packages())
    }

    pub fn cache_size(&self) -> u64 {
        self.cache.size_bytes()
    }

    fn in_flight_packages(&self) -> HashSet<String> {
        self.jobs
            .values()
            .filter(|job| !job.join.is_finished())
            .flat_map(|job| job.packages.iter().cloned())
            .collect()
    }
}

impl std::fmt::Debug for BackgroundPrefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPrefetcher")
            .field("cache_dir", &self.cache.dir())
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

/// Body of one prefetch job.
///
/// Iterates the package list, warming one cache entry per fetched package
/// and appending one progress line per attempt. Failures never stop the
/// loop; cancellation stops it between (or during) fetches.
async fn run_job(
    packages: Vec<String>,
    cache: PackageCache,
    fetch_command: Vec<String>,
    log_path: PathBuf,
    attempted: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    for package in &packages {
        if cancel.is_cancelled() {
            append_log(&log_path, &format!("cancelled before {}", package));
            return;
        }

        let outcome = fetch_one(&fetch_command, package, &cancel).await;
        attempted.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => {
                if let Err(err) = cache.warm(package) {
                    failed.fetch_add(1, Ordering::Relaxed);
                    append_log(&log_path, &format!("fail {}: cache write: {}", package, err));
                } else {
                    append_log(&log_path, &format!("ok {}", package));
                }
            }
            Err(reason) => {
                failed.fetch_add(1, Ordering::Relaxed);
                append_log(&log_path, &format!("fail {}: {}", package, reason));
            }
        }
    }
    rlog_debug!("prefetch: job drained {} packages", packages.len());
}

/// Run the fetch command for one package, honoring cancellation.
async fn fetch_one(
    fetch_command: &[String],
    package: &str,
    cancel: &CancellationToken,
) -> std::result::Result<(), String> {
    let Some((program, args)) = fetch_command.split_first() else {
        // Empty command configured: warming is marker-only.
        return Ok(());
    };

    let mut child = Command::new(program)
        .args(args)
        .arg(package)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| format!("spawn {}: {}", program, err))?;

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("exited with {}", status)),
            Err(err) => Err(format!("wait failed: {}", err)),
        },
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            Err("cancelled".to_string())
        }
    }
}

fn append_log(path: &Path, message: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] {}", timestamp, message);
    }
}
