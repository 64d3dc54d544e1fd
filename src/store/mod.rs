//! Remote object store abstraction.
//!
//! The pipeline only needs three calls from the bucket it uploads into: send
//! one local file as an object, read back its metadata, and check at startup
//! that the bucket is reachable at all. [`RemoteStore`] captures exactly that
//! so the upload and verification stages can run against S3 in production
//! and against an in-memory or scripted store in tests.

pub mod error;
pub mod object;

use std::path::Path;

use async_trait::async_trait;

pub use error::StoreError;
pub use object::ObjectStoreRemote;

/// What the store reported after a successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    /// Size of the stored object according to the store.
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Object metadata as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Trait for the remote side of the pipeline.
///
/// Object-safe so it can be shared as `Arc<dyn RemoteStore>` across per-file
/// tasks. Both `put_file` and `head_object` must be idempotent: the upload
/// executor re-sends the whole file on every attempt.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create or overwrite the object at `key` with the contents of the local
    /// file at `path`. Local read failures come back as
    /// [`StoreError::LocalRead`]; the file itself is never modified.
    async fn put_file(&self, key: &str, path: &Path) -> Result<PutReceipt, StoreError>;

    /// Fetch current metadata for the object at `key`.
    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StoreError>;

    /// Check that the configured bucket is reachable with the current
    /// credentials.
    async fn probe(&self) -> Result<(), StoreError>;

    /// Human-readable target used in log lines, e.g. `s3://footage`.
    fn describe(&self) -> String;
}
