//! File lifecycle coordinator.
//!
//! Receives candidate paths, deduplicates them against the tracking map and
//! spawns one task per new file. Each task runs the file through
//! stability → upload → verify → delete, strictly in sequence. Tasks never
//! share a path, and deletion happens only inside the task, right after a
//! passing verification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::error::{StabilityError, UploadError};
use super::keys::remote_key;
use super::lifecycle::{Action, FileState, LifecycleEvent, TrackedFile, TransitionError};
use super::stability::StabilityGate;
use super::upload::UploadExecutor;
use super::verify::VerificationCheck;
use crate::retry::RetryConfig;
use crate::store::RemoteStore;

/// How often `run` reports status (and pets the systemd watchdog).
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub key_prefix: String,
    pub retry: RetryConfig,
    pub file_age_threshold: Duration,
    pub stability_poll_interval: Duration,
    /// Files allowed in the upload+verify phase at once.
    pub max_concurrent_uploads: usize,
    pub shutdown_grace_period: Duration,
}

/// Point-in-time view of the tracking map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub tracked: HashMap<PathBuf, FileState>,
    pub completed: u64,
    pub failed: u64,
}

impl CoordinatorSnapshot {
    /// Files still being worked on (tracked and not terminal).
    pub fn in_flight(&self) -> usize {
        self.tracked.values().filter(|s| !s.is_terminal()).count()
    }

    pub fn status_line(&self) -> String {
        format!(
            "{} in flight, {} uploaded, {} failed",
            self.in_flight(),
            self.completed,
            self.failed
        )
    }
}

/// How a file's task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Completed,
    Failed,
    /// Vanished, unreadable or interrupted by shutdown. Nothing was deleted.
    Dropped,
}

/// State shared between the coordinator and its per-file tasks.
struct Shared {
    gate: StabilityGate,
    executor: UploadExecutor,
    verifier: VerificationCheck,
    retry: RetryConfig,
    key_prefix: String,
    permits: Semaphore,
    tracked: Mutex<HashMap<PathBuf, FileState>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

pub struct FileLifecycleCoordinator {
    shared: Arc<Shared>,
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl FileLifecycleCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn RemoteStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let shared = Shared {
            gate: StabilityGate::new(config.file_age_threshold, config.stability_poll_interval),
            executor: UploadExecutor::new(Arc::clone(&store), config.retry),
            verifier: VerificationCheck::new(store),
            retry: config.retry,
            key_prefix: config.key_prefix,
            permits: Semaphore::new(config.max_concurrent_uploads.max(1)),
            tracked: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            tasks: JoinSet::new(),
            shutdown,
            grace: config.shutdown_grace_period,
        }
    }

    /// Start processing `path` unless it is already tracked.
    ///
    /// Returns `true` if a task was spawned. The check and the insertion
    /// happen under one lock, so two events for the same path can never
    /// both win. Paths that ended `Failed` stay tracked and are ignored.
    pub fn dispatch(&mut self, path: PathBuf) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if !self.shared.try_track(&path) {
            tracing::debug!(path = %path.display(), "Already tracked, ignoring event");
            return false;
        }

        tracing::info!(path = %path.display(), "Discovered new file");
        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            shared.process(path, shutdown).await;
        });
        true
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            tracked: self.shared.tracked().clone(),
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Dispatch every path from `paths` until shutdown, then drain.
    ///
    /// `on_status` is called periodically with a fresh snapshot. If the
    /// stream ends on its own, already-dispatched files are still carried
    /// to completion before returning.
    pub async fn run<S, F>(&mut self, paths: S, mut on_status: F)
    where
        S: Stream<Item = PathBuf>,
        F: FnMut(&CoordinatorSnapshot),
    {
        futures_util::pin_mut!(paths);
        let shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval_at(Instant::now() + STATUS_INTERVAL, STATUS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = paths.next() => match next {
                    Some(path) => {
                        self.dispatch(path);
                    }
                    None => {
                        tracing::info!("Path stream ended, waiting for in-flight files");
                        break;
                    }
                },
                Some(res) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    log_task_exit(res);
                }
                _ = ticker.tick() => on_status(&self.snapshot()),
            }
        }

        self.drain().await;
        on_status(&self.snapshot());
    }

    /// Wait for dispatched tasks. Without shutdown this waits indefinitely;
    /// once shutdown fires the remaining tasks get the grace period and are
    /// then aborted.
    async fn drain(&mut self) {
        let shutdown = self.shutdown.clone();
        while !shutdown.is_cancelled() {
            tokio::select! {
                res = self.tasks.join_next() => match res {
                    Some(res) => log_task_exit(res),
                    None => return,
                },
                _ = shutdown.cancelled() => {}
            }
        }

        if self.tasks.is_empty() {
            return;
        }
        tracing::info!(
            remaining = self.tasks.len(),
            grace_secs = self.grace.as_secs(),
            "Waiting for in-flight uploads to finish"
        );
        let tasks = &mut self.tasks;
        let waited = tokio::time::timeout(self.grace, async {
            while let Some(res) = tasks.join_next().await {
                log_task_exit(res);
            }
        })
        .await;
        if waited.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Grace period elapsed, aborting remaining tasks"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

fn log_task_exit(res: Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            tracing::error!(error = %e, "File task panicked");
        }
    }
}

impl Shared {
    fn tracked(&self) -> MutexGuard<'_, HashMap<PathBuf, FileState>> {
        // The map holds plain states; a panicked holder cannot leave it torn.
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_track(&self, path: &Path) -> bool {
        let mut map = self.tracked();
        if map.contains_key(path) {
            return false;
        }
        map.insert(path.to_path_buf(), FileState::Discovered);
        true
    }

    fn mirror(&self, file: &TrackedFile) {
        if let Some(state) = self.tracked().get_mut(&file.path) {
            *state = file.state;
        }
    }

    fn step(
        &self,
        file: &mut TrackedFile,
        event: LifecycleEvent,
    ) -> Result<Action, TransitionError> {
        let action = file.apply(event, &self.retry, Instant::now())?;
        self.mirror(file);
        Ok(action)
    }

    async fn process(self: Arc<Self>, path: PathBuf, shutdown: CancellationToken) {
        let mut file = TrackedFile::new(path);
        let disposition = match self.drive(&mut file, &shutdown).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(path = %file.path.display(), error = %e, "Lifecycle error; local file kept");
                Disposition::Failed
            }
        };

        let mut map = self.tracked();
        match disposition {
            Disposition::Completed => {
                map.remove(&file.path);
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Disposition::Failed => {
                map.insert(file.path.clone(), FileState::Failed);
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            Disposition::Dropped => {
                map.remove(&file.path);
            }
        }
    }

    async fn drive(
        &self,
        file: &mut TrackedFile,
        shutdown: &CancellationToken,
    ) -> Result<Disposition, TransitionError> {
        let Some(key) = remote_key(&self.key_prefix, &file.path) else {
            tracing::error!(path = %file.path.display(), "File name is not valid UTF-8; cannot upload");
            return Ok(Disposition::Failed);
        };

        self.step(file, LifecycleEvent::Watch)?;
        match self.gate.wait_until_stable(&file.path, shutdown).await {
            Ok(snap) => {
                tracing::debug!(
                    path = %file.path.display(),
                    size_bytes = snap.size,
                    waited_ms = snap.waited.as_millis() as u64,
                    "File is stable"
                );
                self.step(
                    file,
                    LifecycleEvent::Stable {
                        size: snap.size,
                        modified: snap.modified,
                    },
                )?;
            }
            Err(StabilityError::NotFound(_)) => {
                tracing::info!(path = %file.path.display(), "File disappeared before it settled");
                return Ok(Disposition::Dropped);
            }
            Err(StabilityError::Cancelled(_)) => {
                tracing::info!(path = %file.path.display(), "Shutdown before file settled; left in place");
                return Ok(Disposition::Dropped);
            }
            Err(e @ StabilityError::Io { .. }) => {
                tracing::warn!(path = %file.path.display(), error = %e, "Cannot inspect file, dropping");
                return Ok(Disposition::Dropped);
            }
        }

        loop {
            let permit = tokio::select! {
                permit = self.permits.acquire() => match permit {
                    Ok(p) => p,
                    Err(_) => return Ok(Disposition::Dropped),
                },
                _ = shutdown.cancelled() => {
                    tracing::info!(path = %file.path.display(), "Shutdown before upload; left in place");
                    return Ok(Disposition::Dropped);
                }
            };

            let receipt = match self.executor.upload(file, &key, shutdown).await {
                Ok(receipt) => receipt,
                Err(UploadError::NotFound(_)) => {
                    tracing::warn!(path = %file.path.display(), "File vanished during upload");
                    return Ok(Disposition::Dropped);
                }
                Err(UploadError::Cancelled(_)) => {
                    tracing::info!(path = %file.path.display(), "Shutdown during backoff; left in place");
                    return Ok(Disposition::Dropped);
                }
                Err(UploadError::Lifecycle(e)) => return Err(e),
                Err(e) => {
                    tracing::error!(
                        path = %file.path.display(),
                        size_bytes = file.size,
                        attempts = file.attempt_count,
                        error = %e,
                        "Upload failed; local file kept"
                    );
                    return Ok(Disposition::Failed);
                }
            };

            self.step(
                file,
                LifecycleEvent::Uploaded {
                    reported_size: receipt.size,
                },
            )?;
            let verdict = self.verifier.verify(&key, file.size, &receipt).await;
            drop(permit);

            if verdict.passed() {
                tracing::debug!(path = %file.path.display(), key = %key, "{}", verdict);
                self.step(file, LifecycleEvent::Verified)?;
                delete_local(&file.path).await;
                return Ok(Disposition::Completed);
            }

            match self.step(file, LifecycleEvent::VerificationFailed)? {
                Action::Backoff(delay) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        attempt = file.attempt_count,
                        max_attempts = self.retry.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        "Verification failed ({}), re-uploading",
                        verdict
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => {
                            tracing::info!(path = %file.path.display(), "Shutdown during backoff; left in place");
                            return Ok(Disposition::Dropped);
                        }
                    }
                }
                _ => {
                    tracing::error!(
                        path = %file.path.display(),
                        size_bytes = file.size,
                        attempts = file.attempt_count,
                        "Verification failed on final attempt ({}); local file kept",
                        verdict
                    );
                    return Ok(Disposition::Failed);
                }
            }
        }
    }
}

/// Remove the local copy of a verified upload. A failure is logged; the
/// remote copy is correct, so the file still counts as completed.
async fn delete_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "Deleted local file"),
        Err(e) => tracing::error!(
            path = %path.display(),
            error = %e,
            "Upload verified but local file could not be deleted"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{PutScript, ScriptedStore};
    use crate::store::ObjectStoreRemote;
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use object_store::ObjectStoreExt as _;
    use std::sync::atomic::AtomicUsize;
    use tracing_subscriber::layer::SubscriberExt as _;

    /// Counts WARN and ERROR events seen by the current thread's subscriber.
    #[derive(Clone, Default)]
    struct LevelCounter {
        warns: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            match *event.metadata().level() {
                tracing::Level::ERROR => {
                    self.errors.fetch_add(1, Ordering::SeqCst);
                }
                tracing::Level::WARN => {
                    self.warns.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    fn config(max_concurrent_uploads: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            key_prefix: String::new(),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_secs: 5,
                max_delay_secs: 300,
                jitter: false,
            },
            file_age_threshold: Duration::from_secs(2),
            stability_poll_interval: Duration::from_millis(250),
            max_concurrent_uploads,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }

    fn clip(dir: &tempfile::TempDir, name: &str, len: usize) -> PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, vec![7u8; len]).unwrap();
        p
    }

    async fn run_paths(coordinator: &mut FileLifecycleCoordinator, paths: Vec<PathBuf>) {
        coordinator
            .run(futures_util::stream::iter(paths), |_| {})
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_clip_uploaded_verified_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_001.mp4", 5_242_880);
        let memory = Arc::new(InMemory::new());
        let store = Arc::new(ObjectStoreRemote::from_store(memory.clone(), "memory://test"));

        let mut c = FileLifecycleCoordinator::new(config(2), store, CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        let snap = c.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 0);
        assert!(snap.tracked.is_empty());
        assert!(!path.exists());
        let meta = memory.head(&ObjectPath::from("clip_001.mp4")).await.unwrap();
        assert_eq!(meta.size, 5_242_880);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_mismatch_triggers_reupload() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_002.mp4", 5_242_880);
        let store = Arc::new(ScriptedStore::new(
            vec![PutScript::Truncate(5_000_000)],
            PutScript::Accept,
        ));

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        assert_eq!(store.put_count(), 2);
        assert_eq!(store.stored_size("clip_002.mp4"), Some(5_242_880));
        assert_eq!(c.snapshot().completed, 1);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_mismatch_fails_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_002.mp4", 4096);
        let store = Arc::new(ScriptedStore::new(Vec::new(), PutScript::Truncate(4000)));

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        assert_eq!(store.put_count(), 3);
        let snap = c.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.tracked.get(&path), Some(&FileState::Failed));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_forever_fails_once_with_single_error() {
        let counter = LevelCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_003.mp4", 2048);
        let store = Arc::new(ScriptedStore::new(Vec::new(), PutScript::Throttle));

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        assert_eq!(store.put_count(), 3);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counter.warns.load(Ordering::SeqCst), 2);
        assert_eq!(c.snapshot().tracked.get(&path), Some(&FileState::Failed));
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 2048]);

        // Re-observing a failed path does not restart it.
        assert!(!c.dispatch(path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_puts_retry_until_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_005.mp4", 1024);
        let store = Arc::new(ScriptedStore::new(
            vec![PutScript::Deny, PutScript::Deny],
            PutScript::Accept,
        ));

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        assert_eq!(store.put_count(), 3);
        let snap = c.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 0);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_forever_fails_after_every_attempt() {
        let counter = LevelCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_006.mp4", 1024);
        let store = Arc::new(ScriptedStore::new(Vec::new(), PutScript::Deny));

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        assert_eq!(store.put_count(), 3);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
        assert_eq!(c.snapshot().tracked.get(&path), Some(&FileState::Failed));
        assert!(path.exists());
    }

    /// Verifies normally, but swaps the local clip for a non-empty directory
    /// on the first `head_object` so the following delete cannot succeed.
    struct UndeletableAfterVerify {
        inner: ScriptedStore,
        local: PathBuf,
        swapped: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl RemoteStore for UndeletableAfterVerify {
        async fn put_file(
            &self,
            key: &str,
            path: &Path,
        ) -> Result<crate::store::PutReceipt, crate::store::StoreError> {
            self.inner.put_file(key, path).await
        }

        async fn head_object(
            &self,
            key: &str,
        ) -> Result<crate::store::ObjectInfo, crate::store::StoreError> {
            if !self.swapped.swap(true, Ordering::SeqCst) {
                std::fs::remove_file(&self.local).unwrap();
                std::fs::create_dir(&self.local).unwrap();
                std::fs::write(self.local.join("keep"), b"x").unwrap();
            }
            self.inner.head_object(key).await
        }

        async fn probe(&self) -> Result<(), crate::store::StoreError> {
            Ok(())
        }

        fn describe(&self) -> String {
            self.inner.describe()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_failure_still_completes_with_one_error() {
        let counter = LevelCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_007.mp4", 2048);
        let store = Arc::new(UndeletableAfterVerify {
            inner: ScriptedStore::accepting(),
            local: path.clone(),
            swapped: std::sync::atomic::AtomicBool::new(false),
        });

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        let snap = c.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 0);
        assert!(snap.tracked.is_empty());
        assert_eq!(store.inner.put_count(), 1);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
        assert!(path.is_dir());
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_deleted_during_stability_wait_is_dropped_quietly() {
        let counter = LevelCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip_004.mp4", 100);
        let store = Arc::new(ScriptedStore::accepting());

        let remove = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::fs::remove_file(remove).unwrap();
        });

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path.clone()]).await;

        assert_eq!(store.put_count(), 0);
        assert!(c.snapshot().tracked.is_empty());
        assert_eq!(counter.warns.load(Ordering::SeqCst), 0);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_events_upload_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 512);
        let store = Arc::new(ScriptedStore::accepting());

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        assert!(c.dispatch(path.clone()));
        assert!(!c.dispatch(path.clone()));
        assert_eq!(c.snapshot().in_flight(), 1);
        run_paths(&mut c, vec![path.clone(), path.clone()]).await;

        assert_eq!(store.put_count(), 1);
        assert_eq!(c.snapshot().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_concurrency_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..5)
            .map(|i| clip(&dir, &format!("clip_{i:03}.mp4"), 256))
            .collect();
        let store = Arc::new(ScriptedStore::accepting().with_put_delay(Duration::from_secs(3)));

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), CancellationToken::new());
        run_paths(&mut c, paths.clone()).await;

        assert_eq!(c.snapshot().completed, 5);
        assert!(store.max_parallel_puts.load(Ordering::SeqCst) <= 2);
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_stability_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::accepting());
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), token.clone());
        let paths = futures_util::stream::iter(vec![path.clone()]).chain(futures_util::stream::pending());
        c.run(paths, |_| {}).await;

        assert_eq!(store.put_count(), 0);
        assert!(path.exists());
        assert!(c.snapshot().tracked.is_empty());
        assert!(!c.dispatch(path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_in_flight_attempt_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::accepting().with_put_delay(Duration::from_secs(10)));
        let token = CancellationToken::new();

        // Stable at ~2s, put runs 2s..12s; shutdown lands mid-put.
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let mut c = FileLifecycleCoordinator::new(config(2), store.clone(), token.clone());
        let paths = futures_util::stream::iter(vec![path.clone()]).chain(futures_util::stream::pending());
        c.run(paths, |_| {}).await;

        assert_eq!(store.put_count(), 1);
        assert_eq!(c.snapshot().completed, 1);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_aborts_stuck_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::accepting().with_put_delay(Duration::from_secs(600)));
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let mut cfg = config(2);
        cfg.shutdown_grace_period = Duration::from_secs(10);
        let mut c = FileLifecycleCoordinator::new(cfg, store.clone(), token.clone());
        let started = Instant::now();
        let paths = futures_util::stream::iter(vec![path.clone()]).chain(futures_util::stream::pending());
        c.run(paths, |_| {}).await;

        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(path.exists());
        assert_eq!(c.snapshot().completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_callback_reports_final_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::accepting());

        let mut c = FileLifecycleCoordinator::new(config(2), store, CancellationToken::new());
        let mut last = None;
        c.run(futures_util::stream::iter(vec![path]), |s| {
            last = Some(s.status_line())
        })
        .await;

        assert_eq!(last.as_deref(), Some("0 in flight, 1 uploaded, 0 failed"));
    }

    #[tokio::test]
    async fn test_prefix_applied_to_remote_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = clip(&dir, "clip.mp4", 64);
        let store = Arc::new(ScriptedStore::accepting());

        let mut cfg = config(1);
        cfg.key_prefix = "cam1/".into();
        cfg.file_age_threshold = Duration::from_millis(50);
        cfg.stability_poll_interval = Duration::from_millis(10);
        let mut c = FileLifecycleCoordinator::new(cfg, store.clone(), CancellationToken::new());
        run_paths(&mut c, vec![path]).await;

        assert_eq!(store.stored_size("cam1/clip.mp4"), Some(64));
    }
}
