//! Console and optional rotating file logging.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
///
/// The returned guard flushes the file writer on drop and must live until
/// the process exits.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let appender = rolling_appender(path, config.log_backup_count)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    if let Some(path) = &config.log_file {
        tracing::info!(
            path = %path.display(),
            max_log_size_mb = config.max_log_size,
            backups = config.log_backup_count,
            "File logging enabled (daily rotation)"
        );
    }
    if size_limit_ignored(config) {
        tracing::warn!(
            max_log_size_mb = config.max_log_size,
            "max_log_size has no effect; log files rotate daily, not by size"
        );
    }
    Ok(guard)
}

/// Whether the operator asked for a size limit the appender cannot honor.
fn size_limit_ignored(config: &LoggingConfig) -> bool {
    config.max_log_size != LoggingConfig::default().max_log_size
}

/// Daily-rotated appender keeping the live file plus `backups` old ones.
fn rolling_appender(path: &Path, backups: usize) -> anyhow::Result<RollingFileAppender> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("s3uploader-rs.log");

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create log directory {}", dir.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(backups.saturating_add(1))
        .build(dir)
        .with_context(|| format!("Cannot open log file {}", path.display()))
}
