//! Tracing configuration and log routing.
//!
//! Logs go to stdout with a compact formatter and to a file through a non-blocking writer.
//! `CARELENS_LOG_FILE` selects the file; otherwise `logs/carelens.log` is used.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_VAR: &str = "CARELENS_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "carelens.log";

/// Where file logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    /// Append to an explicit file path.
    File(PathBuf),
    /// Write `name` inside `dir`, creating the directory first.
    Directory { dir: PathBuf, name: String },
}

fn resolve_log_target(explicit: Option<String>) -> LogTarget {
    match explicit.filter(|value| !value.trim().is_empty()) {
        Some(path) => LogTarget::File(PathBuf::from(path.trim())),
        None => LogTarget::Directory {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            name: DEFAULT_LOG_NAME.to_string(),
        },
    }
}

/// Configure tracing subscribers for stdout and file logging.
///
/// Respects `RUST_LOG` for filtering and defaults to `info`. Safe to call once per process.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = resolve_log_target(std::env::var(LOG_FILE_VAR).ok());
    match open_writer(&target) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

fn open_writer(target: &LogTarget) -> Option<NonBlocking> {
    let (writer, guard) = match target {
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::Directory { dir, name } => {
            if let Err(err) = std::fs::create_dir_all(dir) {
                eprintln!("Failed to create log directory {}: {err}", dir.display());
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}
