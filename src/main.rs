use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use rigger::catalog::TaskCatalog;
use rigger::config::Config;
use rigger::core::task::{Task, TaskId};
use rigger::exec::{BatchRunner, RunSummary, Sequencer};
use rigger::prefetch::{BackgroundPrefetcher, JobOutcome};
use rigger::state::StateStore;
use rigger::{rlog, rlog_warn, Result};

/// Window the CLI grants a still-running prefetch job after a batch ends.
const PREFETCH_DRAIN_SECS: u64 = 5;

/// Rigger - step-wise installer for web application stacks
#[derive(Parser, Debug)]
#[command(name = "rigger")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RIGGER_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Project root directory
    #[arg(short = 'C', long, default_value = ".")]
    pub project_root: PathBuf,

    /// Task source directory, relative to the project root
    #[arg(long, default_value = "tasks")]
    pub tasks: PathBuf,

    /// Re-run completed tasks and rescan a fresh index
    #[arg(short, long)]
    pub force: bool,

    /// Enable debug logging (writes to ~/.rigger/rigger.log)
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Rebuild or validate the task index
    Refresh,

    /// Run an explicit list of tasks, in the given order
    Run {
        /// Task paths relative to the source directory
        tasks: Vec<String>,

        /// Skip the background package prefetch
        #[arg(long)]
        no_prefetch: bool,
    },

    /// Run every cataloged task in phase order
    RunDir {
        /// Skip the background package prefetch
        #[arg(long)]
        no_prefetch: bool,
    },

    /// Inspect or reset durable completion state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Manage the package prefetch cache
    Prefetch {
        #[command(subcommand)]
        command: PrefetchCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum StateCommand {
    /// List completed tasks with timestamps
    List,
    /// Forget one task's completion
    Clear { task: String },
    /// Forget all completions
    ClearAll,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum PrefetchCommand {
    /// Start a prefetch job for the configured features and wait for it
    Run {
        /// Seconds to wait before stopping the job
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Drop every cache entry not claimed by a running job
    Purge,
    /// Report the cache size in bytes
    Size,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rigger::log::init_with_debug(cli.debug);

    let root = cli.project_root.clone();
    let config = Config::load(&root)?;
    Config::ensure_dirs(&root)?;

    let source_root = root.join(&cli.tasks);
    let mut catalog = TaskCatalog::new(
        source_root.clone(),
        Config::index_path(&root),
        Duration::from_secs(config.freshness_secs),
    );
    let store = StateStore::new(Config::state_path(&root));

    match cli.command {
        Command::Refresh => {
            let report = catalog.refresh(cli.force)?;
            println!(
                "{} tasks indexed, {} warnings{}",
                report.entries,
                report.warnings,
                if report.scanned { "" } else { " (index reused)" }
            );
            if report.sparse_required_vars {
                println!("warning: most tasks declare no required variables");
            }
            Ok(())
        }
        Command::Run { tasks, no_prefetch } => {
            catalog.refresh(cli.force)?;
            let selected: Vec<Task> = tasks
                .iter()
                .map(|path| catalog.materialize(&TaskId::new(path.clone())))
                .collect();
            let batch = batch_runner(&config, &root, &source_root, &store, cli.force)?;
            let summary =
                with_prefetch(&config, &root, no_prefetch, batch.run_batch(&selected)).await?;
            finish(summary)
        }
        Command::RunDir { no_prefetch } => {
            catalog.refresh(cli.force)?;
            let batch = batch_runner(&config, &root, &source_root, &store, cli.force)?;
            let summary =
                with_prefetch(&config, &root, no_prefetch, batch.run_directory(&catalog)).await?;
            finish(summary)
        }
        Command::State { command } => run_state(&store, command),
        Command::Prefetch { command } => run_prefetch(&config, &root, command).await,
    }
}

fn batch_runner<'a>(
    config: &Config,
    root: &std::path::Path,
    source_root: &std::path::Path,
    store: &'a StateStore,
    force: bool,
) -> Result<BatchRunner<'a>> {
    let sequencer = Sequencer::new(config, root.to_path_buf(), source_root.to_path_buf())?;
    Ok(BatchRunner::new(sequencer, store).with_force(force))
}

/// Run a batch with the background prefetcher warming the cache alongside.
///
/// The prefetcher is best-effort: failing to start it is logged and the
/// batch proceeds; after the batch the job gets a short drain window, then
/// is stopped.
async fn with_prefetch(
    config: &Config,
    root: &std::path::Path,
    no_prefetch: bool,
    batch: impl std::future::Future<Output = Result<RunSummary>>,
) -> Result<RunSummary> {
    let mut prefetcher = None;
    let mut job = None;
    if !no_prefetch {
        match BackgroundPrefetcher::new(config, root) {
            Ok(mut p) => match p.start_for_config(&config.features) {
                Ok(id) => {
                    prefetcher = Some(p);
                    job = Some(id);
                }
                Err(err) => rlog_warn!("prefetch unavailable: {}", err),
            },
            Err(err) => rlog_warn!("prefetch unavailable: {}", err),
        }
    }

    let summary = batch.await?;

    if let (Some(mut p), Some(id)) = (prefetcher, job) {
        match p.wait(id, Duration::from_secs(PREFETCH_DRAIN_SECS)).await {
            Ok(JobOutcome::Completed { attempted, failed }) => {
                rlog!("prefetch finished: {} attempted, {} failed", attempted, failed);
            }
            Ok(JobOutcome::TimedOut { attempted, total }) => {
                rlog!("prefetch stopped at {}/{} packages", attempted, total);
            }
            Err(err) => rlog_warn!("prefetch wait failed: {}", err),
        }
    }
    Ok(summary)
}

fn finish(summary: RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn run_state(store: &StateStore, command: StateCommand) -> Result<()> {
    match command {
        StateCommand::List => {
            for (key, timestamp) in store.list_completed() {
                println!("{}  {}", timestamp.to_rfc3339(), key);
            }
            println!("{} completed", store.count_completed());
            Ok(())
        }
        StateCommand::Clear { task } => {
            store.clear(&task)?;
            println!("cleared {}", task);
            Ok(())
        }
        StateCommand::ClearAll => {
            store.clear_all()?;
            println!("cleared all completions");
            Ok(())
        }
    }
}

async fn run_prefetch(
    config: &Config,
    root: &std::path::Path,
    command: PrefetchCommand,
) -> Result<()> {
    let mut prefetcher = BackgroundPrefetcher::new(config, root)?;
    match command {
        PrefetchCommand::Run { timeout_secs } => {
            let id = prefetcher.start_for_config(&config.features)?;
            println!("job {} started", id.short());
            match prefetcher.wait(id, Duration::from_secs(timeout_secs)).await? {
                JobOutcome::Completed { attempted, failed } => {
                    println!("{} attempted, {} failed", attempted, failed);
                }
                JobOutcome::TimedOut { attempted, total } => {
                    println!("timed out at {}/{} packages", attempted, total);
                }
            }
            Ok(())
        }
        PrefetchCommand::Purge => {
            let removed = prefetcher.purge();
            println!("{} cache entries removed", removed);
            Ok(())
        }
        PrefetchCommand::Size => {
            println!("{} bytes", prefetcher.cache_size());
            Ok(())
        }
    }
}
