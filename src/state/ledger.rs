//! Append-based completion ledger.
//!
//! One line per successful task, `taskKey=success:<rfc3339>`. Only
//! successes are recorded; a failed attempt leaves no row, so the next run
//! tries the task again. Marks are idempotent: the first success row for a
//! key is authoritative and duplicates are no-ops.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::rlog_debug;

const SUCCESS_MARKER: &str = "=success:";

/// Durable map from task key to last known successful completion.
///
/// Safe to use before any explicit initialization: a missing ledger file
/// means zero completions, and the first mark creates it.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Open a store backed by the ledger at `path`. The file is not created
    /// until the first mark.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Record a successful completion for `key`.
    ///
    /// No-op if the key already has a success row. Appends one line
    /// otherwise; the ledger is never rewritten in place by a mark.
    pub fn mark_success(&self, key: &str) -> Result<()> {
        if self.has_succeeded(key) {
            rlog_debug!("state: {} already marked, skipping", key);
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}{}{}", key, SUCCESS_MARKER, Utc::now().to_rfc3339())?;
        rlog_debug!("state: marked {} success", key);
        Ok(())
    }

    /// Whether `key` has a recorded success. A missing ledger means no.
    pub fn has_succeeded(&self, key: &str) -> bool {
        self.rows()
            .iter()
            .any(|(row_key, _)| row_key.as_str() == key)
    }

    /// Remove any rows for `key` by rewriting the ledger without them.
    pub fn clear(&self, key: &str) -> Result<()> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Ok(());
        };
        let kept: Vec<&str> = content
            .lines()
            .filter(|line| parse_row(line).map(|(k, _)| k != key).unwrap_or(true))
            .collect();
        let mut body = kept.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body)?;
        rlog_debug!("state: cleared {}", key);
        Ok(())
    }

    /// Delete the whole ledger. The next run starts from zero completions.
    pub fn clear_all(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn count_completed(&self) -> usize {
        self.rows().len()
    }

    /// Completed tasks with their timestamps, in ledger (append) order.
    pub fn list_completed(&self) -> Vec<(String, DateTime<Utc>)> {
        self.rows()
    }

    fn rows(&self) -> Vec<(String, DateTime<Utc>)> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        content.lines().filter_map(parse_row).collect()
    }
}

fn parse_row(line: &str) -> Option<(String, DateTime<Utc>)> {
    let (key, rest) = line.split_once(SUCCESS_MARKER)?;
    let timestamp = DateTime::parse_from_rfc3339(rest).ok()?.with_timezone(&Utc);
    Some((key.to_string(), timestamp))
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("path", &self.path).finish()
    }
}
