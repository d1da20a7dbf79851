//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary project roots with a task source tree
//! - Writing task scripts with header metadata
//! - Building fast-tuned sequencers, catalogs, and stores

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use rigger::catalog::TaskCatalog;
use rigger::config::Config;
use rigger::exec::Sequencer;
use rigger::state::StateStore;

/// A throwaway project root with a `tasks/` source tree.
pub struct TestProject {
    /// The temporary directory backing the project.
    pub temp_dir: TempDir,
    /// Path to the project root.
    pub root: PathBuf,
}

impl TestProject {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();
        fs::create_dir_all(root.join("tasks")).expect("Failed to create tasks dir");
        Self { temp_dir, root }
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// Write a task script under the source tree.
    pub fn write_task(&self, rel: &str, body: &str) {
        let path = self.tasks_dir().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create task parent dir");
        }
        fs::write(path, body).expect("Failed to write task script");
    }

    /// A catalog over the project's task tree with the default freshness.
    pub fn catalog(&self) -> TaskCatalog {
        TaskCatalog::new(
            self.tasks_dir(),
            Config::index_path(&self.root),
            Duration::from_secs(3600),
        )
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(Config::state_path(&self.root))
    }

    /// A sequencer tuned for test speed: short retry delay and grace period.
    pub fn sequencer(&self) -> Sequencer {
        Sequencer::new(&Config::default(), self.root.clone(), self.tasks_dir())
            .expect("bash should be available")
            .with_retry_delay(Duration::from_millis(10))
            .with_grace_period(Duration::from_millis(200))
    }

    /// A config whose package cache lives inside the project and whose
    /// fetch command never touches the network.
    pub fn prefetch_config(&self, fetch_command: &str) -> Config {
        Config {
            fetch_command: fetch_command.to_string(),
            cache_dir: Some(
                self.root
                    .join("cache")
                    .to_string_lossy()
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
