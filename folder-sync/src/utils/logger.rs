//! Logging configuration using tracing.
//!
//! Every event goes to two sinks: the console and the configured log file.

use crate::utils::errors::{Result, SyncError};
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize logging with the specified level, mirroring output into `log_file`.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for as long as the process logs.
pub fn init(level: &str, log_file: &Path) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_file)?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer(file_writer))
        .try_init()
        .map_err(|e| SyncError::Logger(e.to_string()))?;

    Ok(guard)
}

/// Open `log_file` for appending, creating its directory if needed.
pub fn file_appender(log_file: &Path) -> Result<RollingFileAppender> {
    let file_name = log_file.file_name().ok_or_else(|| {
        SyncError::Logger(format!("log path has no file name: {}", log_file.display()))
    })?;
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(directory)
        .map_err(|e| SyncError::Logger(e.to_string()))
}

/// Plain-text layer for the log file: same format as the console, no colours.
pub fn file_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
}
