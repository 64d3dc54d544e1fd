//! Per-file state machine.
//!
//! `TrackedFile::apply` is the only place a file's state changes. It is a
//! pure function of the current state, the event, the retry budget and the
//! supplied clock reading, so every path through the lifecycle can be tested
//! without timers, files or a store. The async stages (gate, executor,
//! verifier) report what happened as [`LifecycleEvent`]s and carry out the
//! returned [`Action`].

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::time::Instant;

use crate::retry::RetryConfig;

/// Lifecycle state of one file under management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    Discovered,
    AwaitingStability,
    Uploading,
    Verifying,
    Completed,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::AwaitingStability => "awaiting_stability",
            Self::Uploading => "uploading",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a file, reported by one of the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Processing started; wait for the writer to finish.
    Watch,
    /// Size and mtime held still for the configured threshold.
    Stable {
        size: u64,
        modified: Option<SystemTime>,
    },
    /// An upload attempt is about to send the file.
    AttemptStarted,
    /// The store acknowledged the put.
    Uploaded { reported_size: u64 },
    /// The put failed, for whatever reason. Every failure costs an attempt.
    UploadFailed,
    /// Remote size matches the confirmed local size.
    Verified,
    /// Remote size differs, or could not be read back.
    VerificationFailed,
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AwaitStability,
    Upload,
    Verify,
    /// Sleep, then start another upload attempt.
    Backoff(Duration),
    /// Verified: remove the local copy now.
    DeleteLocal,
    /// Out of attempts: leave the file alone.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid lifecycle transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: FileState,
    pub event: LifecycleEvent,
}

/// One file under management. Owned by the task processing it; the
/// coordinator's shared map only mirrors its `state`.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub path: PathBuf,
    /// Size confirmed by the stability gate. Zero until then.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub state: FileState,
    pub attempt_count: u32,
    pub next_retry_at: Option<Instant>,
    /// Size the store reported for the most recent successful put.
    pub remote_size: Option<u64>,
}

impl TrackedFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            size: 0,
            modified: None,
            state: FileState::Discovered,
            attempt_count: 0,
            next_retry_at: None,
            remote_size: None,
        }
    }

    /// Apply `event`, returning the next action.
    ///
    /// Transitions: `Discovered → AwaitingStability → Uploading → Verifying →
    /// {Completed | Uploading (retry) | Failed}`, plus `Uploading → Uploading`
    /// or `Uploading → Failed` on a failed put. `Failed` is reached only with
    /// the budget spent. Anything else is rejected and leaves the file
    /// untouched.
    pub fn apply(
        &mut self,
        event: LifecycleEvent,
        retry: &RetryConfig,
        now: Instant,
    ) -> Result<Action, TransitionError> {
        use FileState as S;
        use LifecycleEvent as E;

        let invalid = TransitionError {
            from: self.state,
            event,
        };

        match (self.state, event) {
            (S::Discovered, E::Watch) => {
                self.state = S::AwaitingStability;
                Ok(Action::AwaitStability)
            }
            (S::AwaitingStability, E::Stable { size, modified }) => {
                self.size = size;
                self.modified = modified;
                self.state = S::Uploading;
                Ok(Action::Upload)
            }
            (S::Uploading, E::AttemptStarted) => {
                if !retry.has_attempts_left(self.attempt_count) {
                    return Err(invalid);
                }
                self.attempt_count += 1;
                self.next_retry_at = None;
                Ok(Action::Upload)
            }
            (S::Uploading, E::Uploaded { reported_size }) if self.attempt_count > 0 => {
                self.remote_size = Some(reported_size);
                self.state = S::Verifying;
                Ok(Action::Verify)
            }
            (S::Uploading, E::UploadFailed) if self.attempt_count > 0 => {
                Ok(self.retry_or_fail(retry, now))
            }
            (S::Verifying, E::Verified) => {
                self.state = S::Completed;
                Ok(Action::DeleteLocal)
            }
            (S::Verifying, E::VerificationFailed) => {
                self.state = S::Uploading;
                Ok(self.retry_or_fail(retry, now))
            }
            _ => Err(invalid),
        }
    }

    fn retry_or_fail(&mut self, retry: &RetryConfig, now: Instant) -> Action {
        if retry.has_attempts_left(self.attempt_count) {
            let delay = retry.delay_for_retry(self.attempt_count.saturating_sub(1));
            self.next_retry_at = Some(now + delay);
            Action::Backoff(delay)
        } else {
            self.state = FileState::Failed;
            self.next_retry_at = None;
            Action::GiveUp
        }
    }
}
