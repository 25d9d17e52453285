use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

const LOG_ENV: &str = "SHELLMEND_LOG";
const LOG_FILE_PREFIX: &str = "shellmend.log";

/// Installs the global subscriber: stderr for the terminal plus a daily rolling
/// file in `log_dir`. The returned guard must live until exit so buffered lines
/// reach the file.
pub fn init(config: &LoggingConfig, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter());

    let file_writer = log_dir.and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => Some(tracing_appender::non_blocking(
            tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX),
        )),
        Err(e) => {
            eprintln!("Could not create log directory {}: {}", dir.display(), e);
            None
        }
    });

    match file_writer {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            let _ = tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
            None
        }
    }
}
