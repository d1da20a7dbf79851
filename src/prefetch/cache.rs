//! Package cache backing the background prefetcher.
//!
//! One marker file per warmed package; the file's mtime is the entry's
//! `cached_at`. Eviction is age-based and must never remove an entry whose
//! package belongs to an in-flight download job, so every sweep takes the
//! set of in-flight packages to skip.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::rlog_debug;

const MARKER_EXTENSION: &str = "pkg";

/// Age-evicted cache of warmed package specs.
#[derive(Debug, Clone)]
pub struct PackageCache {
    dir: PathBuf,
    max_age: Duration,
}

impl PackageCache {
    pub fn new(dir: PathBuf, max_age: Duration) -> Self {
        Self { dir, max_age }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a warmed package. The marker stores the exact spec so listing
    /// can recover it from the sanitized file name.
    pub fn warm(&self, package: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.marker_path(package), format!("{}\n", package))?;
        Ok(())
    }

    pub fn contains(&self, package: &str) -> bool {
        self.marker_path(package).is_file()
    }

    pub fn cached_at(&self, package: &str) -> Option<SystemTime> {
        fs::metadata(self.marker_path(package))
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// All cached `(package, cached_at)` entries, unordered.
    pub fn entries(&self) -> Vec<(String, SystemTime)> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.path().extension().and_then(|e| e.to_str()) == Some(MARKER_EXTENSION)
            })
            .filter_map(|entry| {
                let package = fs::read_to_string(entry.path())
                    .ok()?
                    .lines()
                    .next()?
                    .to_string();
                let cached_at = entry.metadata().ok()?.modified().ok()?;
                Some((package, cached_at))
            })
            .collect()
    }

    /// Remove entries older than the max age, skipping in-flight packages.
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self, in_flight: &HashSet<String>) -> usize {
        let now = SystemTime::now();
        self.remove_where(in_flight, |cached_at| {
            now.duration_since(cached_at)
                .map(|age| age > self.max_age)
                .unwrap_or(false)
        })
    }

    /// Remove every entry, skipping in-flight packages. Returns the number
    /// of entries removed.
    pub fn purge(&self, in_flight: &HashSet<String>) -> usize {
        self.remove_where(in_flight, |_| true)
    }

    /// Total size of the cache directory contents, in bytes.
    pub fn size_bytes(&self) -> u64 {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return 0;
        };
        read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }

    fn remove_where<F>(&self, in_flight: &HashSet<String>, should_remove: F) -> usize
    where
        F: Fn(SystemTime) -> bool,
    {
        let mut removed = 0;
        for (package, cached_at) in self.entries() {
            if in_flight.contains(&package) {
                rlog_debug!("cache: keeping in-flight {}", package);
                continue;
            }
            if should_remove(cached_at) && fs::remove_file(self.marker_path(&package)).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Package specs contain `/` and `:`; flatten them for the file name.
    fn marker_path(&self, package: &str) -> PathBuf {
        let sanitized: String = package
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.{}", sanitized, MARKER_EXTENSION))
    }
}
