//! Directory watcher producing candidate clip paths.
//!
//! Wraps a `notify` watcher (native OS notifications or the polling
//! fallback) on a single directory, non-recursively. Raw events are pushed
//! from notify's thread into a tokio channel and filtered here to files with
//! a watched extension that were created in, or renamed into, the directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::Stream;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::error::WatchError;
use super::keys::has_watched_extension;
use crate::types::WatchMode;

/// Settings for [`DirectoryWatcher::start`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub directory: PathBuf,
    pub extensions: Vec<String>,
    pub mode: WatchMode,
    pub poll_interval: Duration,
    /// Emit files already present before reporting live events.
    pub scan_existing: bool,
}

pub struct DirectoryWatcher {
    // Dropping the notify watcher stops event delivery.
    _watcher: Box<dyn Watcher + Send>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    backlog: std::collections::VecDeque<PathBuf>,
    extensions: Vec<String>,
    directory: PathBuf,
    last_emitted: Option<PathBuf>,
}

impl DirectoryWatcher {
    /// Start watching. Fails if the directory is missing, unreadable or not
    /// a directory, or if the OS watch cannot be registered.
    ///
    /// Emitted paths sit under the canonical form of the directory, since
    /// some backends (FSEvents, watches through symlinks) report resolved
    /// paths whatever was registered.
    pub fn start(options: WatchOptions) -> Result<Self, WatchError> {
        ensure_directory(&options.directory)?;
        let directory = options
            .directory
            .canonicalize()
            .map_err(|e| WatchError::Inaccessible {
                path: options.directory.clone(),
                source: e,
            })?;

        let (tx, events) = mpsc::unbounded_channel();
        let handler = move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        };

        let notify_err = |source| WatchError::Notify {
            path: directory.clone(),
            source,
        };
        let mut watcher: Box<dyn Watcher + Send> = match options.mode {
            WatchMode::Native => Box::new(notify::recommended_watcher(handler).map_err(notify_err)?),
            WatchMode::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(options.poll_interval),
                )
                .map_err(notify_err)?,
            ),
        };
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(notify_err)?;

        // Registered before scanning so nothing written in between is missed;
        // duplicates are harmless because the coordinator dedups by path.
        let backlog = if options.scan_existing {
            scan_directory(&directory, &options.extensions).map_err(|e| {
                WatchError::Inaccessible {
                    path: directory.clone(),
                    source: e,
                }
            })?
        } else {
            Default::default()
        };

        tracing::info!(
            directory = %directory.display(),
            mode = ?options.mode,
            existing = backlog.len(),
            "Watching for new clips"
        );

        Ok(Self {
            _watcher: watcher,
            events,
            backlog,
            extensions: options.extensions,
            directory,
            last_emitted: None,
        })
    }

    /// Next candidate path. Returns `None` only if the notify backend shut
    /// down, which does not happen while `self` is alive.
    pub async fn next_path(&mut self) -> Option<PathBuf> {
        if let Some(path) = self.backlog.pop_front() {
            self.last_emitted = Some(path.clone());
            return Some(path);
        }
        loop {
            match self.events.recv().await? {
                Ok(event) => {
                    for path in self.candidate_paths(&event) {
                        if self.last_emitted.as_ref() == Some(&path) {
                            continue;
                        }
                        self.last_emitted = Some(path.clone());
                        self.backlog.push_back(path);
                    }
                    if let Some(path) = self.backlog.pop_front() {
                        return Some(path);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        directory = %self.directory.display(),
                        error = %e,
                        "Watch error, continuing"
                    );
                }
            }
        }
    }

    /// Turn the watcher into a lazy, unbounded stream of paths.
    pub fn into_stream(self) -> impl Stream<Item = PathBuf> + Send {
        futures_util::stream::unfold(self, |mut watcher| async move {
            let path = watcher.next_path().await?;
            Some((path, watcher))
        })
    }

    fn candidate_paths(&self, event: &Event) -> Vec<PathBuf> {
        let paths: &[PathBuf] = match event.kind {
            EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
                &event.paths
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &event.paths,
            // (from, to): only the destination can be a new clip.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.get(1..).unwrap_or_default()
            }
            _ => return Vec::new(),
        };
        paths
            .iter()
            .filter(|p| p.parent() == Some(self.directory.as_path()))
            .filter(|p| has_watched_extension(p, &self.extensions))
            .cloned()
            .collect()
    }
}

/// Fail unless `path` is an existing, readable directory.
pub fn ensure_directory(path: &Path) -> Result<(), WatchError> {
    let meta = std::fs::metadata(path).map_err(|e| WatchError::Inaccessible {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !meta.is_dir() {
        return Err(WatchError::NotADirectory(path.to_path_buf()));
    }
    std::fs::read_dir(path).map_err(|e| WatchError::Inaccessible {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Matching regular files already in `dir`, sorted by name.
fn scan_directory(
    dir: &Path,
    extensions: &[String],
) -> std::io::Result<std::collections::VecDeque<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_watched_extension(&path, extensions) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into())
}
