//! [`RemoteStore`] backed by the `object_store` crate.
//!
//! Files up to one part in size go out as a single put. Larger files are
//! streamed from disk through a multipart upload, so memory per upload stays
//! near `part_size * (MAX_PARTS_IN_FLIGHT + 1)` whatever the clip size.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload, PutResult, WriteMultipart};
use tokio::io::AsyncReadExt;

use super::{ObjectInfo, PutReceipt, RemoteStore, StoreError};

/// 8 MiB; S3 rejects parts below 5 MiB except the last.
const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Parts uploading concurrently within one multipart upload.
const MAX_PARTS_IN_FLIGHT: usize = 2;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Uploads into any `object_store` backend; S3 in production.
#[derive(Clone)]
pub struct ObjectStoreRemote {
    store: Arc<dyn ObjectStore>,
    target: String,
    part_size: usize,
}

impl std::fmt::Debug for ObjectStoreRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreRemote")
            .field("target", &self.target)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreRemote {
    /// Build an S3 client for `bucket` in `region`.
    ///
    /// Credentials come from the standard AWS environment (env vars, profile
    /// web identity, instance metadata) via `AmazonS3Builder::from_env`.
    /// `endpoint_url` targets S3-compatible stores such as MinIO; plain
    /// `http://` endpoints are allowed only when given explicitly.
    pub fn s3(bucket: &str, region: &str, endpoint_url: Option<&str>) -> Result<Self, StoreError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket);

        if let Some(endpoint) = endpoint_url {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            target: format!("s3://{}", bucket),
            part_size: DEFAULT_PART_SIZE,
        })
    }

    /// Wrap an already-built store (in-memory stores in tests).
    pub fn from_store(store: Arc<dyn ObjectStore>, target: impl Into<String>) -> Self {
        Self {
            store,
            target: target.into(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Files larger than `part_size` bytes are sent as multipart uploads in
    /// parts of this size.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Stream `file` into a multipart upload. The upload is aborted if
    /// reading or sending a part fails.
    async fn put_multipart_file(
        &self,
        key: &str,
        location: &Path,
        path: &std::path::Path,
        mut file: tokio::fs::File,
    ) -> Result<PutResult, StoreError> {
        let remote = |e| StoreError::from_object_store(key, e);
        let upload = self.store.put_multipart(location).await.map_err(remote)?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.part_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(source) => {
                    abort_upload(writer, key).await;
                    return Err(StoreError::LocalRead {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            };
            if let Err(e) = writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await {
                abort_upload(writer, key).await;
                return Err(remote(e));
            }
            writer.write(&buf[..n]);
        }

        writer.finish().await.map_err(remote)
    }
}

async fn abort_upload(writer: WriteMultipart, key: &str) {
    if let Err(e) = writer.abort().await {
        tracing::debug!(key = %key, error = %e, "Failed to abort multipart upload");
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreRemote {
    async fn put_file(&self, key: &str, path: &std::path::Path) -> Result<PutReceipt, StoreError> {
        let start = Instant::now();
        let location = Path::from(key);
        let local = |source| StoreError::LocalRead {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(local)?;
        let len = file.metadata().await.map_err(local)?.len();
        let multipart = len > self.part_size as u64;

        let result = if multipart {
            self.put_multipart_file(key, &location, path, file).await?
        } else {
            let mut body = Vec::with_capacity(len as usize);
            file.read_to_end(&mut body).await.map_err(local)?;
            self.store
                .put(&location, PutPayload::from(body))
                .await
                .map_err(|e| StoreError::from_object_store(key, e))?
        };

        // Neither a put nor a completed multipart upload reports a length, so
        // the receipt takes it from the stored object rather than from disk.
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| StoreError::from_object_store(key, e))?;

        tracing::debug!(
            target_store = %self.target,
            key = %key,
            sent_bytes = len,
            stored_bytes = meta.size,
            multipart,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "put acknowledged"
        );

        Ok(PutReceipt {
            size: meta.size,
            e_tag: result.e_tag.or(meta.e_tag),
        })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let location = Path::from(key);
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| StoreError::from_object_store(key, e))?;

        Ok(ObjectInfo {
            size: meta.size,
            e_tag: meta.e_tag,
        })
    }

    async fn probe(&self) -> Result<(), StoreError> {
        // A delimited listing of the bucket root fails for a missing bucket or
        // bad credentials, which a head on a single key cannot tell apart.
        self.store
            .list_with_delimiter(None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_object_store(&self.target, e))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}
