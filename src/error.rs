use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Task source root not found: {0}")]
    SourceRootMissing(PathBuf),

    #[error("State directory is not writable: {0}")]
    StateDirUnwritable(PathBuf),

    #[error("Shell interpreter not found: {0}")]
    ShellNotFound(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Prefetch job not found: {0}")]
    JobNotFound(crate::prefetch::JobId),
}

pub type Result<T> = std::result::Result<T, Error>;
