//! Logging Setup
//!
//! Installs the global `tracing` subscriber:
//! - Pretty stdout output for development
//! - Optional JSON file output with daily rotation for later ingestion
//! - `log` crate records bridged into `tracing`
//!
//! Filtering follows `RUST_LOG` when set and the configured level otherwise.

use std::fs;
use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "precliniset-wizard.log";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Directory(#[from] io::Error),

    #[error("A global subscriber is already installed")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize the logging system.
///
/// Returns the file writer's `WorkerGuard` when JSON file output is enabled. It
/// must be kept alive for the duration of the process so buffered lines are
/// flushed on shutdown.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let (file_layer, guard) = if config.json_file {
        let log_dir = config.log_dir();
        fs::create_dir_all(&log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_filter(env_filter(config));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .pretty()
        .with_filter(env_filter(config));

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing_log::LogTracer::init()?;

    if config.json_file {
        tracing::info!(
            log_file = %config.log_dir().join(LOG_FILE_NAME).display(),
            "Logging initialized (daily rolling)"
        );
    }

    Ok(guard)
}
