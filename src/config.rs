use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{rlog_debug, Error, Result};

/// Default per-attempt timeout for a task, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default number of retries after a failed attempt.
pub const DEFAULT_RETRIES: u32 = 2;
/// Default delay between attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
/// Default grace period between SIGTERM and SIGKILL, in seconds.
pub const DEFAULT_GRACE_SECS: u64 = 2;
/// Default task index freshness window, in seconds.
pub const DEFAULT_FRESHNESS_SECS: u64 = 3600;
/// Default package cache max age, in seconds (7 days).
pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 604_800;

/// Stack features the installer can enable.
///
/// Each enabled flag contributes packages to the prefetch list. The flags
/// themselves are collected by the menu layer and handed to the core.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub redis: bool,
    #[serde(default)]
    pub node: bool,
    #[serde(default)]
    pub mailer: bool,
    #[serde(default)]
    pub queue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shell interpreter used to run task scripts and test commands.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Delay between task attempts, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Grace period between graceful and forceful termination, in seconds.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    /// Task index freshness window, in seconds.
    #[serde(default = "default_freshness")]
    pub freshness_secs: u64,
    /// Package cache max age, in seconds.
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_secs: u64,
    /// Command used to warm one package into the cache; the package spec is
    /// appended as the final argument.
    #[serde(default = "default_fetch_command")]
    pub fetch_command: String,
    /// Override for the package cache directory (default ~/.rigger/cache).
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub features: FeatureFlags,
    /// Values exported into every task's environment.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_grace() -> u64 {
    DEFAULT_GRACE_SECS
}

fn default_freshness() -> u64 {
    DEFAULT_FRESHNESS_SECS
}

fn default_cache_max_age() -> u64 {
    DEFAULT_CACHE_MAX_AGE_SECS
}

fn default_fetch_command() -> String {
    "docker pull".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            retry_delay_secs: default_retry_delay(),
            grace_secs: default_grace(),
            freshness_secs: default_freshness(),
            cache_max_age_secs: default_cache_max_age(),
            fetch_command: default_fetch_command(),
            cache_dir: None,
            features: FeatureFlags::default(),
            vars: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Directory for rigger's per-project artifacts (index, ledger, logs).
    pub fn rigger_dir(project_root: &Path) -> PathBuf {
        project_root.join(".rigger")
    }

    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join("rigger.toml")
    }

    pub fn index_path(project_root: &Path) -> PathBuf {
        Self::rigger_dir(project_root).join("index")
    }

    pub fn state_path(project_root: &Path) -> PathBuf {
        Self::rigger_dir(project_root).join("state.ledger")
    }

    pub fn job_logs_dir(project_root: &Path) -> PathBuf {
        Self::rigger_dir(project_root).join("logs")
    }

    /// Package cache directory: config override, or ~/.rigger/cache.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(dirs::home_dir()
                .ok_or(Error::NoHomeDir)?
                .join(".rigger")
                .join("cache")),
        }
    }

    pub fn load(project_root: &Path) -> Result<Self> {
        let path = Self::config_path(project_root);
        rlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        rlog_debug!(
            "Config loaded: shell={}, fetch_command={:?}, features={:?}",
            config.shell,
            config.fetch_command,
            config.features
        );
        Ok(config)
    }

    pub fn save(&self, project_root: &Path) -> Result<()> {
        let path = Self::config_path(project_root);
        fs::write(&path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Create the per-project artifact directories, verifying writability.
    pub fn ensure_dirs(project_root: &Path) -> Result<()> {
        let rigger_dir = Self::rigger_dir(project_root);
        let logs_dir = Self::job_logs_dir(project_root);
        rlog_debug!(
            "Config::ensure_dirs rigger={} logs={}",
            rigger_dir.display(),
            logs_dir.display()
        );
        fs::create_dir_all(&logs_dir)
            .map_err(|_| Error::StateDirUnwritable(rigger_dir.clone()))?;
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
