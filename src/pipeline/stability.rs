//! Stability gate: decides when a freshly-written clip is safe to read.
//!
//! A recorder writes incrementally, so "the file exists" says nothing about
//! whether it is finished. The gate samples size and mtime on a short poll
//! interval and only lets the file through once both have held still for
//! the configured threshold, measured from the last observed change.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::StabilityError;

/// Size and mtime of a file at the moment it was confirmed stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableSnapshot {
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// How long the gate waited in total.
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    threshold: Duration,
    poll_interval: Duration,
}

impl StabilityGate {
    pub fn new(threshold: Duration, poll_interval: Duration) -> Self {
        Self {
            threshold,
            // A zero interval would spin on metadata calls.
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    /// Block until `path` has kept the same size and mtime for the
    /// threshold, then return what was observed.
    ///
    /// Fails with `NotFound` if the file goes away while waiting, and with
    /// `Cancelled` once `shutdown` fires.
    pub async fn wait_until_stable(
        &self,
        path: &Path,
        shutdown: &CancellationToken,
    ) -> Result<StableSnapshot, StabilityError> {
        let started = Instant::now();
        let mut last = sample(path).await?;
        let mut unchanged_since = Instant::now();

        loop {
            if unchanged_since.elapsed() >= self.threshold {
                return Ok(StableSnapshot {
                    size: last.0,
                    modified: last.1,
                    waited: started.elapsed(),
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    return Err(StabilityError::Cancelled(path.to_path_buf()));
                }
            }

            let current = sample(path).await?;
            if current != last {
                tracing::trace!(
                    path = %path.display(),
                    size_bytes = current.0,
                    "File still changing"
                );
                last = current;
                unchanged_since = Instant::now();
            }
        }
    }
}

async fn sample(path: &Path) -> Result<(u64, Option<SystemTime>), StabilityError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok((meta.len(), meta.modified().ok())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(StabilityError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(StabilityError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
