pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod exec;
pub mod log;
pub mod prefetch;
pub mod state;

pub use catalog::{RefreshReport, TaskCatalog};
pub use config::{Config, FeatureFlags};
pub use crate::core::{ExecStatus, ExecutionResult, Task, TaskId};
pub use error::{Error, Result};
pub use exec::{BatchRunner, DependencyRunner, RunSummary, Sequencer};
pub use prefetch::{BackgroundPrefetcher, JobId, JobOutcome};
pub use state::StateStore;
