// ABOUTME: tracing subscriber setup: env filter, console output and an optional rolling file
// ABOUTME: The returned guard must stay alive for buffered file output to be flushed

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

/// Keeps the non-blocking file writer alive.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_logging(
    options: &LogOptions,
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level)
            .with_context(|| format!("Invalid log level '{}'", options.level))?,
    };

    let console = if options.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file, guard) = if config.record_to_file {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let appender = Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix("burrow")
            .filename_suffix("log")
            .max_log_files(config.max_log_files.max(1))
            .build(log_dir)
            .context("Failed to create rolling log file")?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Logging was already initialised")?;

    Ok(LoggingGuard { _file_guard: guard })
}
