//! Task catalog: discovery, header metadata, and the persisted index.
//!
//! The catalog walks a source tree for task scripts, extracts the declared
//! metadata from each script's header lines, and keeps a file-persisted
//! index with a freshness window so repeated invocations don't rescan the
//! tree. The index is written atomically (temp file + rename) so a reader
//! never observes a half-written index.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use regex::Regex;

use crate::core::graph::DependencyGraph;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::{rlog_debug, rlog_warn};

/// Number of leading script lines scanned for header metadata.
pub const HEADER_SCAN_LINES: usize = 50;

/// File extension that marks a file as a task script.
const TASK_EXTENSION: &str = "sh";

/// Persisted projection of a task: what the index file stores per script.
///
/// Timeout, retries, and the verification command stay in the script header
/// and are re-read when the task is materialized for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Path relative to the source root; doubles as the task key.
    pub path: TaskId,
    /// Declared ordering phase. None when the header omits or mangles it.
    pub phase: Option<u32>,
    pub required_vars: BTreeSet<String>,
    pub dependencies: BTreeSet<TaskId>,
}

/// Outcome of a catalog refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    /// Number of task entries now in the index.
    pub entries: usize,
    /// Non-fatal problems found while scanning (missing or malformed
    /// metadata, unreadable files, dependency graph defects).
    pub warnings: usize,
    /// More than half of the discovered tasks declare no required variables.
    pub sparse_required_vars: bool,
    /// Whether a filesystem scan actually ran (false: fresh index reused).
    pub scanned: bool,
}

/// Metadata indexer over a task source tree.
pub struct TaskCatalog {
    source_root: PathBuf,
    index_path: PathBuf,
    freshness: Duration,
    /// Entries in discovery order.
    entries: Vec<IndexEntry>,
    /// Filesystem scans performed over this catalog's lifetime.
    scan_count: u64,
}

impl TaskCatalog {
    /// Create a catalog over `source_root`, persisting its index at
    /// `index_path` with the given freshness window.
    pub fn new(source_root: PathBuf, index_path: PathBuf, freshness: Duration) -> Self {
        Self {
            source_root,
            index_path,
            freshness,
            entries: Vec::new(),
            scan_count: 0,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Filesystem scans performed so far. Lets callers verify that a fresh
    /// index is reused instead of rescanned.
    pub fn scan_count(&self) -> u64 {
        self.scan_count
    }

    /// Rebuild or reload the index.
    ///
    /// When the persisted index is younger than the freshness window and
    /// `force` is false, the index file is reloaded without touching the
    /// source tree. Otherwise the tree is rescanned and the index rewritten
    /// atomically.
    ///
    /// # Errors
    /// Returns an error only when the source root is missing or the index
    /// cannot be written. Per-file problems are warnings.
    pub fn refresh(&mut self, force: bool) -> Result<RefreshReport> {
        if !self.source_root.is_dir() {
            return Err(Error::SourceRootMissing(self.source_root.clone()));
        }

        if !force && self.index_is_fresh() {
            if let Ok(entries) = self.load_index() {
                rlog_debug!(
                    "catalog: index fresh, reusing {} entries from {}",
                    entries.len(),
                    self.index_path.display()
                );
                self.entries = entries;
                return Ok(RefreshReport {
                    entries: self.entries.len(),
                    warnings: 0,
                    sparse_required_vars: false,
                    scanned: false,
                });
            }
            // Unreadable index inside the freshness window: fall through to
            // a rescan rather than failing the refresh.
            rlog_warn!("catalog: fresh index unreadable, rescanning");
        }

        let mut warnings = 0usize;
        let mut missing_vars = 0usize;
        let mut entries = Vec::new();

        self.scan_count += 1;
        for path in self.discover_task_files()? {
            let rel = path
                .strip_prefix(&self.source_root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let id = TaskId::new(rel);

            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    rlog_warn!("catalog: skipping unreadable {}: {}", path.display(), err);
                    warnings += 1;
                    continue;
                }
            };

            let (task, file_warnings) = parse_header(id.clone(), &content);
            for warning in &file_warnings {
                rlog_warn!("catalog: {}: {}", id, warning);
            }
            warnings += file_warnings.len();
            if task.required_vars.is_empty() {
                missing_vars += 1;
            }

            entries.push(IndexEntry {
                path: task.id,
                phase: task.phase,
                required_vars: task.required_vars,
                dependencies: task.dependencies,
            });
        }

        warnings += self.validate_graph(&entries);

        self.write_index(&entries)?;
        self.entries = entries;

        let sparse = !self.entries.is_empty() && missing_vars * 2 > self.entries.len();
        if sparse {
            rlog_warn!(
                "catalog: {}/{} tasks declare no required variables",
                missing_vars,
                self.entries.len()
            );
        }

        rlog_debug!(
            "catalog: scanned {} tasks, {} warnings",
            self.entries.len(),
            warnings
        );
        Ok(RefreshReport {
            entries: self.entries.len(),
            warnings,
            sparse_required_vars: sparse,
            scanned: true,
        })
    }

    /// All entries in discovery order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Entries declaring the given phase (None selects unknown-phase tasks).
    pub fn entries_for_phase(&self, phase: Option<u32>) -> Vec<&IndexEntry> {
        self.entries.iter().filter(|e| e.phase == phase).collect()
    }

    /// Union of every task's declared required variables.
    pub fn all_required_vars(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|e| e.required_vars.iter().cloned())
            .collect()
    }

    /// Required variables declared by one task, if it is indexed.
    pub fn required_vars_for(&self, id: &TaskId) -> Option<&BTreeSet<String>> {
        self.entries
            .iter()
            .find(|e| &e.path == id)
            .map(|e| &e.required_vars)
    }

    /// Materialize a full task from its script header.
    ///
    /// Re-reads the script so timeout, retries, and the verification command
    /// are current even when the index entry was loaded from disk. An
    /// unreadable script yields a task with pessimistic defaults; the
    /// failure then surfaces as execution data, not a catalog error.
    pub fn materialize(&self, id: &TaskId) -> Task {
        let path = self.source_root.join(id.as_str());
        match fs::read_to_string(&path) {
            Ok(content) => parse_header(id.clone(), &content).0,
            Err(err) => {
                rlog_warn!("catalog: materialize {} failed: {}", path.display(), err);
                Task::new(id.clone())
            }
        }
    }

    fn index_is_fresh(&self) -> bool {
        let Ok(meta) = fs::metadata(&self.index_path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age < self.freshness,
            // Index mtime in the future: treat as fresh.
            Err(_) => true,
        }
    }

    /// Collect task files under the source root, depth-first with children
    /// sorted by name, so discovery order is deterministic. Hidden entries
    /// and the `.rigger` artifact directory are skipped.
    fn discover_task_files(&self) -> Result<Vec<PathBuf>> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
            let mut children: Vec<_> = fs::read_dir(dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .collect();
            children.sort();

            for child in children {
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if name.starts_with('.') {
                    continue;
                }
                if child.is_dir() {
                    walk(&child, out)?;
                } else if child.extension().and_then(|e| e.to_str()) == Some(TASK_EXTENSION) {
                    out.push(child);
                }
            }
            Ok(())
        }

        let mut files = Vec::new();
        walk(&self.source_root, &mut files)?;
        Ok(files)
    }

    /// Cycle and unknown-reference checks over the declared dependencies.
    /// Returns the number of warnings raised.
    fn validate_graph(&self, entries: &[IndexEntry]) -> usize {
        let owned: Vec<(TaskId, Vec<TaskId>)> = entries
            .iter()
            .map(|e| {
                (
                    e.path.clone(),
                    e.dependencies.iter().cloned().collect::<Vec<_>>(),
                )
            })
            .collect();
        let graph =
            DependencyGraph::from_entries(owned.iter().map(|(id, deps)| (id, deps.as_slice())));

        let mut warnings = 0;
        for (dependent, missing) in graph.unknown_refs() {
            rlog_warn!(
                "catalog: {} depends on unknown task {}",
                dependent,
                missing
            );
            warnings += 1;
        }
        if let Err(at) = graph.topological_order() {
            rlog_warn!("catalog: dependency cycle detected at {}", at);
            warnings += 1;
        }
        warnings
    }

    /// Write the full index atomically: build a temp file next to the live
    /// index, then rename it over the top.
    fn write_index(&self, entries: &[IndexEntry]) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.index_path.with_extension("tmp");
        let mut body = String::new();
        for entry in entries {
            body.push_str(&encode_entry(entry));
            body.push('\n');
        }
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }

    fn load_index(&self) -> Result<Vec<IndexEntry>> {
        let content = fs::read_to_string(&self.index_path)?;
        Ok(content.lines().filter_map(decode_entry).collect())
    }
}

impl std::fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCatalog")
            .field("source_root", &self.source_root)
            .field("entries", &self.entries.len())
            .field("scan_count", &self.scan_count)
            .finish()
    }
}

/// Parse the header convention from a script's leading lines.
///
/// Recognized keys (case-insensitive, `# Key: value` within the first
/// [`HEADER_SCAN_LINES`] lines): `Phase`, `Required`, `Dependencies`,
/// `Timeout`, `Retries`, `Test`. List values are comma-separated.
///
/// Malformed values fall back to pessimistic defaults and are reported in
/// the returned warning list; a missing phase is a warning too.
pub fn parse_header(id: TaskId, content: &str) -> (Task, Vec<String>) {
    // Unwrap: the pattern is a compile-time constant.
    let header_re = Regex::new(r"^#\s*([A-Za-z]+)\s*:\s*(.*)$").unwrap();

    let mut task = Task::new(id);
    let mut warnings = Vec::new();
    let mut saw_phase = false;

    for line in content.lines().take(HEADER_SCAN_LINES) {
        let Some(caps) = header_re.captures(line) else {
            continue;
        };
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();

        match key.as_str() {
            "phase" => match value.parse::<u32>() {
                Ok(phase) => {
                    task.phase = Some(phase);
                    saw_phase = true;
                }
                Err(_) => warnings.push(format!("malformed phase {:?}", value)),
            },
            "required" => {
                task.required_vars = split_list(value).into_iter().collect();
            }
            "dependencies" => {
                task.dependencies = split_list(value).into_iter().map(TaskId::new).collect();
            }
            "timeout" => match value.parse::<u64>() {
                Ok(secs) => task.timeout_secs = secs,
                Err(_) => warnings.push(format!("malformed timeout {:?}", value)),
            },
            "retries" => match value.parse::<u32>() {
                Ok(retries) => task.retries = retries,
                Err(_) => warnings.push(format!("malformed retries {:?}", value)),
            },
            "test" if !value.is_empty() => {
                task.test_command = Some(value.to_string());
            }
            _ => {}
        }
    }

    if !saw_phase {
        warnings.push("no phase declared".to_string());
    }
    (task, warnings)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Index line format: `path|phase|requiredVars|dependencies`, list fields
/// comma-joined, phase field empty for unknown.
fn encode_entry(entry: &IndexEntry) -> String {
    format!(
        "{}|{}|{}|{}",
        entry.path,
        entry.phase.map(|p| p.to_string()).unwrap_or_default(),
        entry
            .required_vars
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(","),
        entry
            .dependencies
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn decode_entry(line: &str) -> Option<IndexEntry> {
    let mut fields = line.splitn(4, '|');
    let path = fields.next()?;
    if path.is_empty() {
        return None;
    }
    let phase = fields.next()?;
    let vars = fields.next()?;
    let deps = fields.next()?;

    Some(IndexEntry {
        path: TaskId::new(path),
        phase: phase.parse::<u32>().ok(),
        required_vars: split_list(vars).into_iter().collect(),
        dependencies: split_list(deps).into_iter().map(TaskId::new).collect(),
    })
}
