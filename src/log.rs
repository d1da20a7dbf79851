//! File-backed logging.
//!
//! Every invocation writes to `~/.rigger/rigger.log`, truncated at init so
//! the file always describes the most recent run. Levels are ordered
//! ERROR < WARN < INFO < DEBUG < TRACE; the threshold defaults to INFO and
//! is raised to DEBUG by the `--debug` flag or `RIGGER_DEBUG=1`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Severity of a log line. Discriminants order the levels so the threshold
/// check is a single integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// Initialize logging at the default INFO threshold.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging, raising the threshold to DEBUG when `debug` is set
/// or `RIGGER_DEBUG=1` is in the environment.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("RIGGER_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let threshold = if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    THRESHOLD.store(threshold as u8, Ordering::SeqCst);

    if let Some(home) = dirs::home_dir() {
        let dir = home.join(".rigger");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("rigger.log");
        // Truncate so the file covers only this invocation.
        let _ = std::fs::write(&path, "");
        let _ = LOG_PATH.set(path);
    }
}

/// Whether a message at `level` would currently be written.
pub fn enabled(level: LogLevel) -> bool {
    level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

/// Append one line to the log file if `level` clears the threshold.
pub fn write(level: LogLevel, msg: &str) {
    if !enabled(level) {
        return;
    }
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", stamp, level.label(), msg);
    }
}

/// Log at INFO level.
#[macro_export]
macro_rules! rlog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

/// Log at ERROR level.
#[macro_export]
macro_rules! rlog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

/// Log at WARN level.
#[macro_export]
macro_rules! rlog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Log at DEBUG level (suppressed unless debug mode is on).
#[macro_export]
macro_rules! rlog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

/// Log at TRACE level.
#[macro_export]
macro_rules! rlog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
