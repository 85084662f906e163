//! Represents a file stored in the object store together with its tracked metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A file row mirrored from the object store.
///
/// The pair (`bucket_name`, `object_name`) is unique among rows whose
/// `deleted_at` is unset. The row is written only by a successful upload and
/// never mutated in place afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal row id.
    pub id: i64,

    /// Base name of the uploaded source file.
    pub file_name: String,

    /// Bucket the object lives in.
    pub bucket_name: String,

    /// Object key within the bucket.
    pub object_name: String,

    /// Size in bytes as reported by the store.
    pub size: i64,

    /// MIME type sent with the object.
    pub content_type: Option<String>,

    /// Entity tag returned by the store on write.
    pub etag: Option<String>,

    /// Timestamp of the object write.
    pub last_modified: Option<DateTime<Utc>>,

    /// Store-specific location descriptor (e.g. `s3://bucket/key`).
    pub location: Option<String>,

    /// Version identifier if the bucket is versioned.
    pub version_id: Option<String>,

    /// Lifecycle expiration rule id, if one applied.
    pub expiration_rule_id: Option<String>,

    /// Soft reference to the owning user.
    pub owner_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft delete marker.
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A listing entry built from the live store listing rather than the database.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FileEntry {
    pub file_name: String,
    pub bucket_name: String,
    pub object_name: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Last path segment of an object key or filesystem path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
}
