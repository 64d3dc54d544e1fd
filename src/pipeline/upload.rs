//! Upload executor: sends one file to the store, retrying with backoff.
//!
//! Every attempt re-reads and re-sends the whole file; there is no resumable
//! upload across attempts. Attempts are counted on the [`TrackedFile`], so
//! retries spent here and re-uploads after a failed verification draw on
//! the same budget. Any failed attempt costs one unit of it, whether the
//! store throttled, refused or the local read broke. The local file is never
//! modified.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::UploadError;
use super::lifecycle::{Action, LifecycleEvent, TrackedFile};
use crate::retry::RetryConfig;
use crate::store::{PutReceipt, RemoteStore, StoreError};

#[derive(Clone)]
pub struct UploadExecutor {
    store: Arc<dyn RemoteStore>,
    retry: RetryConfig,
}

impl UploadExecutor {
    pub fn new(store: Arc<dyn RemoteStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Upload `file` to `key`, retrying failed attempts until the file's
    /// attempt budget runs out.
    ///
    /// On success the file is still `Uploading`; the caller records the
    /// receipt. On `RetriesExhausted` the file is `Failed` with every
    /// attempt spent. A shutdown during backoff returns `Cancelled` without
    /// another attempt; an attempt already sending is always allowed to
    /// finish.
    pub async fn upload(
        &self,
        file: &mut TrackedFile,
        key: &str,
        shutdown: &CancellationToken,
    ) -> Result<PutReceipt, UploadError> {
        loop {
            file.apply(LifecycleEvent::AttemptStarted, &self.retry, Instant::now())?;
            tracing::info!(
                path = %file.path.display(),
                key = %key,
                attempt = file.attempt_count,
                max_attempts = self.retry.max_attempts,
                "Uploading to {}",
                self.store.describe()
            );

            let started = Instant::now();
            let err = match self.attempt(&file.path, key).await {
                Ok(receipt) => {
                    tracing::info!(
                        path = %file.path.display(),
                        key = %key,
                        size_bytes = receipt.size,
                        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                        "Upload succeeded"
                    );
                    return Ok(receipt);
                }
                // Vanished files are not a store problem; the caller drops them.
                Err(e @ UploadError::NotFound(_)) => return Err(e),
                Err(e) => e,
            };

            match file.apply(LifecycleEvent::UploadFailed, &self.retry, Instant::now())? {
                Action::Backoff(delay) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        attempt = file.attempt_count,
                        max_attempts = self.retry.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Upload attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => {
                            return Err(UploadError::Cancelled(file.path.clone()));
                        }
                    }
                }
                _ => {
                    return Err(UploadError::RetriesExhausted {
                        path: file.path.clone(),
                        attempts: file.attempt_count,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    /// One attempt. Exactly one remote object is created or overwritten per
    /// successful call.
    async fn attempt(&self, path: &Path, key: &str) -> Result<PutReceipt, UploadError> {
        self.store.put_file(key, path).await.map_err(|e| match e {
            StoreError::LocalRead { path, source } if source.kind() == ErrorKind::NotFound => {
                UploadError::NotFound(path)
            }
            StoreError::LocalRead { path, source } => UploadError::Read { path, source },
            other => UploadError::Store(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lifecycle::FileState;
    use crate::store::testing::{PutScript, ScriptedStore};
    use std::time::{Duration, SystemTime};

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_secs: 5,
            max_delay_secs: 300,
            jitter: false,
        }
    }

    fn stable_file(path: &Path, size: u64) -> TrackedFile {
        let cfg = retry(1);
        let now = Instant::now();
        let mut f = TrackedFile::new(path.to_path_buf());
        f.apply(LifecycleEvent::Watch, &cfg, now).unwrap();
        f.apply(
            LifecycleEvent::Stable {
                size,
                modified: Some(SystemTime::now()),
            },
            &cfg,
            now,
        )
        .unwrap();
        f
    }

    fn clip(dir: &tempfile::TempDir, name: &str, len: usize) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, vec![3u8; len]).unwrap();
        p
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_001.mp4", 4096);
        let store = Arc::new(ScriptedStore::accepting());
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let mut file = stable_file(&path, 4096);
        let receipt = exec
            .upload(&mut file, "clip_001.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(receipt.size, 4096);
        assert_eq!(file.attempt_count, 1);
        assert_eq!(file.state, FileState::Uploading);
        assert_eq!(store.stored_size("clip_001.mp4"), Some(4096));
        assert!(path.exists(), "executor must never touch the local file");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 128);
        let store = Arc::new(ScriptedStore::new(
            vec![PutScript::Throttle, PutScript::Throttle],
            PutScript::Accept,
        ));
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let started = Instant::now();
        let mut file = stable_file(&path, 128);
        exec.upload(&mut file, "clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.put_count(), 3);
        assert_eq!(file.attempt_count, 3);
        // 5s after the first failure, 10s after the second.
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_every_time_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::new(Vec::new(), PutScript::Throttle));
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let mut file = stable_file(&path, 64);
        let err = exec
            .upload(&mut file, "clip.mp4", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(store.put_count(), 3);
        assert_eq!(file.state, FileState::Failed);
        assert!(path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_spends_whole_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::new(Vec::new(), PutScript::Deny));
        let exec = UploadExecutor::new(store.clone(), retry(5));

        let mut file = stable_file(&path, 64);
        let err = exec
            .upload(&mut file, "clip.mp4", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(store.put_count(), 5);
        assert_eq!(file.attempt_count, 5);
        assert_eq!(file.state, FileState::Failed);
        assert!(path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_then_accepted_succeeds_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::new(vec![PutScript::Deny], PutScript::Accept));
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let mut file = stable_file(&path, 64);
        let receipt = exec
            .upload(&mut file, "clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(receipt.size, 64);
        assert_eq!(store.put_count(), 2);
        assert_eq!(file.attempt_count, 2);
        assert_eq!(file.state, FileState::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_file_spends_whole_budget() {
        let dir = tempfile::tempdir().unwrap();
        // A directory opens but cannot be read as a file.
        let path = dir.path().join("clip.mp4");
        std::fs::create_dir(&path).unwrap();
        let store = Arc::new(ScriptedStore::accepting());
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let mut file = stable_file(&path, 64);
        let err = exec
            .upload(&mut file, "clip.mp4", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::RetriesExhausted { attempts: 3, .. }), "{}", err);
        assert_eq!(file.attempt_count, 3);
        assert_eq!(file.state, FileState::Failed);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_vanished_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.mp4");
        let store = Arc::new(ScriptedStore::accepting());
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let mut file = stable_file(&path, 10);
        let err = exec
            .upload(&mut file, "gone.mp4", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::NotFound(_)));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_cancels_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::new(Vec::new(), PutScript::Throttle));
        let exec = UploadExecutor::new(store.clone(), retry(3));

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let mut file = stable_file(&path, 64);
        let err = exec.upload(&mut file, "clip.mp4", &token).await.unwrap_err();

        assert!(matches!(err, UploadError::Cancelled(_)));
        assert_eq!(store.put_count(), 1);
        assert!(path.exists());
    }
}
