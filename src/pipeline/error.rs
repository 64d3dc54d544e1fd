use std::path::PathBuf;

use thiserror::Error;

use super::lifecycle::TransitionError;
use crate::store::StoreError;

/// Why the stability gate stopped waiting without a confirmed size.
#[derive(Debug, Error)]
pub enum StabilityError {
    /// The file was deleted or moved away while we were watching it.
    #[error("File disappeared before it settled: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot stat {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Shutdown requested while waiting on {}", .0.display())]
    Cancelled(PathBuf),
}

/// Why an upload ended without a receipt.
///
/// `Read` and `Store` describe a single failed attempt; the executor retries
/// both until the attempt budget is spent.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File disappeared before upload: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Upload of {} gave up after {attempts} attempts: {last_error}", path.display())]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },

    #[error("Shutdown requested before the next attempt of {}", .0.display())]
    Cancelled(PathBuf),

    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
}

/// Watcher failures. Only construction errors are fatal; errors reported by
/// a running watcher are logged and skipped.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watched directory is not accessible: {}: {source}", path.display())]
    Inaccessible {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Watched path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to start watcher on {}: {source}", path.display())]
    Notify {
        path: PathBuf,
        source: notify::Error,
    },
}
