//! Object store capabilities consumed by the file service.
//!
//! Two backends implement [`ObjectStore`]:
//! - [`S3ObjectStore`] talks to any S3-compatible endpoint (MinIO, AWS).
//! - [`LocalObjectStore`] keeps payloads on local disk and signs its own
//!   time-limited GET URLs, which the HTTP layer verifies and serves.

mod local;
mod s3;

pub use local::LocalObjectStore;
pub use s3::{S3ObjectStore, S3Settings};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::{path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Attributes the store assigns to a freshly written object.
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub etag: Option<String>,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub location: Option<String>,
    pub version_id: Option<String>,
    pub expiration_rule_id: Option<String>,
}

/// One object descriptor from a live listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Lazy, finite, single-pass listing.
pub type ObjectStream = BoxStream<'static, Result<ObjectInfo, ObjectStoreError>>;

/// Abstraction over S3-style object storage addressed by (bucket, key).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a bucket. Fails if it already exists.
    async fn make_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError>;

    /// Upload the file at `source` under `key`, overwriting any previous payload.
    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: Option<&str>,
    ) -> Result<UploadInfo, ObjectStoreError>;

    /// Copy the object to `destination` on the local filesystem.
    async fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), ObjectStoreError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError>;

    /// Recursively list objects whose key starts with `prefix`.
    /// A missing bucket yields an empty stream.
    fn list_objects(&self, bucket: &str, prefix: &str) -> ObjectStream;

    /// Issue a credential-free GET URL valid for `expiry`.
    async fn presigned_get_object(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, ObjectStoreError>;
}
