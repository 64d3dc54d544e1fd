//! Watch → stabilize → upload → verify → delete.
//!
//! [`run`] wires the stages together for the long-running service; [`check`]
//! performs the same startup validation without watching anything.

pub mod coordinator;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod stability;
pub mod upload;
pub mod verify;
pub mod watcher;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::lock::InstanceLock;
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};
use crate::store::{RemoteStore, StoreError};
use crate::systemd::SystemdNotifier;
use coordinator::{CoordinatorSnapshot, FileLifecycleCoordinator};
use watcher::DirectoryWatcher;

/// Check the bucket is reachable, retrying transient failures only.
pub async fn probe_store(store: &dyn RemoteStore, retry: &RetryConfig) -> Result<(), StoreError> {
    retry_with_backoff(
        retry,
        |e: &StoreError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || store.probe(),
    )
    .await
}

/// Run the service until `shutdown` fires.
///
/// Startup failures (unusable directory, another instance, unreachable
/// bucket, watcher setup) are returned before any file is touched. After
/// that, per-file failures never end the run.
pub async fn run(
    config: &Config,
    store: Arc<dyn RemoteStore>,
    shutdown: CancellationToken,
    notifier: SystemdNotifier,
) -> anyhow::Result<CoordinatorSnapshot> {
    let directory = &config.local.video_directory;
    watcher::ensure_directory(directory)?;
    let lock = InstanceLock::acquire(&config.lock_path())?;

    probe_store(store.as_ref(), &config.retry_config())
        .await
        .with_context(|| format!("Cannot access {}", store.describe()))?;
    tracing::info!(target_store = %store.describe(), "Bucket reachable");

    let watcher = DirectoryWatcher::start(config.watch_options())?;

    tracing::info!(
        directory = %directory.display(),
        target_store = %store.describe(),
        extensions = ?config.local.file_extensions,
        max_attempts = config.upload.max_retries,
        file_age_threshold_secs = config.upload.file_age_threshold,
        lock = %lock.path().display(),
        "s3uploader-rs started"
    );
    notifier.notify_ready();

    let stopping = shutdown.clone();
    tokio::spawn(async move {
        stopping.cancelled().await;
        notifier.notify_stopping();
    });

    let mut coordinator =
        FileLifecycleCoordinator::new(config.coordinator_config(), store, shutdown);
    coordinator
        .run(watcher.into_stream(), |snapshot| {
            notifier.notify_status(&snapshot.status_line());
        })
        .await;

    let snapshot = coordinator.snapshot();
    tracing::info!(
        completed = snapshot.completed,
        failed = snapshot.failed,
        "Stopped"
    );
    drop(lock);
    Ok(snapshot)
}

/// Validate everything `run` needs without watching or uploading.
pub async fn check(config: &Config, store: &dyn RemoteStore) -> anyhow::Result<()> {
    let directory = &config.local.video_directory;
    watcher::ensure_directory(directory)?;
    println!("Directory:   {} (ok)", directory.display());

    probe_store(store, &config.retry_config())
        .await
        .with_context(|| format!("Cannot access {}", store.describe()))?;
    println!("Bucket:      {} (ok)", store.describe());
    println!("Extensions:  {}", config.local.file_extensions.join(", "));
    println!(
        "Retries:     {} attempts, {}s initial delay, {}s cap",
        config.upload.max_retries, config.upload.initial_retry_delay, config.upload.max_retry_delay
    );
    println!("Stable for:  {}s", config.upload.file_age_threshold);
    Ok(())
}
