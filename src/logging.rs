//! Tracing setup: stderr always, plus daily rolling files when a log
//! directory is configured.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Log file name prefix inside the log directory.
const LOG_FILE_PREFIX: &str = "lumen-worker.log";

/// Keeps the background file writer alive. Hold it until exit so buffered
/// lines are flushed.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter from `RUST_LOG`, defaulting to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once, from `main`.
pub fn init(log_dir: Option<&Path>) -> LogGuard {
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .with(file_layer)
                .init();
            LogGuard { _file: Some(guard) }
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .init();
            LogGuard { _file: None }
        }
    }
}
