use std::fs;
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// # Log Settings
///
/// Where and how verbosely a process logs.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Directory receiving the daily rolling JSON files.
    pub dir: PathBuf,
    /// Filter directive used when `RUST_LOG` is not set (e.g. `info`).
    pub level: String,
    /// File name prefix, usually the binary name.
    pub app_name: String,
    /// Number of log files kept by the start-up cleanup.
    pub keep_files: usize,
}

impl LogSettings {
    pub fn new(dir: impl Into<PathBuf>, level: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            level: level.into(),
            app_name: app_name.into(),
            keep_files: 7,
        }
    }
}

/// What a log cleanup did.
#[derive(Debug, Default)]
pub struct LogCleanup {
    /// Files deleted.
    pub removed: usize,
    /// Files that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

/// # Init Tracing
///
/// Installs the global subscriber:
/// - an `EnvFilter` read from `RUST_LOG`, falling back to `settings.level`;
/// - a human-readable console layer with ANSI colours;
/// - a JSON layer written to a daily rolling file through a non-blocking
///   writer.
///
/// Old files of the same application beyond `keep_files` are deleted first;
/// files that could not be deleted are reported once the subscriber is up.
/// The returned guard flushes the file writer when dropped, so keep it alive
/// for the lifetime of the process.
pub fn init_tracing(settings: &LogSettings) -> Result<WorkerGuard, LoggerError> {
    fs::create_dir_all(&settings.dir)?;
    let cleanup = cleanup_old_logs(&settings.dir, &settings.app_name, settings.keep_files)?;

    let file_appender = rolling::daily(&settings.dir, &settings.app_name);
    let (writer, guard) = non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| LoggerError::Filter {
            filter: settings.level.clone(),
            reason: e.to_string(),
        })?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInstalled(e.to_string()))?;

    info!(
        level = %settings.level,
        dir = %settings.dir.display(),
        removed_files = cleanup.removed,
        "Logging initialized"
    );
    for (path, err) in &cleanup.failed {
        warn!(file = %path.display(), error = %err, "Failed to delete old log file");
    }
    Ok(guard)
}

/// Deletes all but the newest `keep` log files of `app_name` in `dir`.
///
/// Daily files are named `<app_name>.<YYYY-MM-DD>`, so name order is age
/// order. A file that cannot be deleted does not stop the others.
pub fn cleanup_old_logs(dir: &Path, app_name: &str, keep: usize) -> Result<LogCleanup, LoggerError> {
    let pattern = format!(
        "{}/{}.*",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(app_name)
    );
    let mut files: Vec<PathBuf> = glob(&pattern)
        .map_err(|e| LoggerError::Filter {
            filter: pattern.clone(),
            reason: e.to_string(),
        })?
        .filter_map(Result::ok)
        .collect();

    files.sort_unstable_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut cleanup = LogCleanup::default();
    for old in files.into_iter().skip(keep) {
        match fs::remove_file(&old) {
            Ok(()) => cleanup.removed += 1,
            Err(e) => cleanup.failed.push((old, e)),
        }
    }
    Ok(cleanup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in ["2026-01-01", "2026-01-02", "2026-01-03", "2026-01-04"] {
            fs::write(dir.path().join(format!("server_flexgraph.{}", day)), "{}").unwrap();
        }
        fs::write(dir.path().join("other_app.2026-01-01"), "{}").unwrap();

        let cleanup = cleanup_old_logs(dir.path(), "server_flexgraph", 2).unwrap();
        assert_eq!(cleanup.removed, 2);
        assert!(cleanup.failed.is_empty());

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "other_app.2026-01-01",
                "server_flexgraph.2026-01-03",
                "server_flexgraph.2026-01-04"
            ]
        );
    }

    #[test]
    fn empty_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let cleanup = cleanup_old_logs(dir.path(), "app", 1).unwrap();
        assert_eq!(cleanup.removed, 0);
        assert!(cleanup.failed.is_empty());
    }

    #[test]
    fn undeletable_entries_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("app.2026-01-01")).unwrap();
        fs::write(dir.path().join("app.2026-01-02"), "{}").unwrap();
        fs::write(dir.path().join("app.2026-01-03"), "{}").unwrap();

        let cleanup = cleanup_old_logs(dir.path(), "app", 1).unwrap();
        assert_eq!(cleanup.removed, 1);
        assert_eq!(cleanup.failed.len(), 1);
        assert_eq!(cleanup.failed[0].0, dir.path().join("app.2026-01-01"));
        assert!(!dir.path().join("app.2026-01-02").exists());
    }
}
