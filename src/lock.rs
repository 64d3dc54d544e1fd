//! Single-instance guard.
//!
//! Two uploaders on the same directory would race to upload and delete the
//! same clips, so startup takes an exclusive advisory lock on a lock file
//! and holds it for the life of the process.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs4::fs_std::FileExt;

#[derive(Debug)]
pub struct InstanceLock {
    // The advisory lock lives as long as this handle.
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without blocking. Fails if another process holds it.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another s3uploader-rs instance is already running (lock: {})",
                path.display()
            )
        })?;
        tracing::debug!(path = %path.display(), "Instance lock acquired");
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
