//! src/services/file_service.rs
//!
//! FileService keeps object-store payloads and the `files` metadata table in
//! step. Every database write is a single short statement; no transaction is
//! held across an object-store call. Uploads first claim the (bucket, object)
//! key with a `pending` row, write the object, then flip the row to `ready`.
//! Deletes mark the row `deleting`, remove the object, then soft-delete the
//! row. Only `ready` rows are visible to lookups.

use crate::{
    db::is_unique_violation,
    models::file::{FileEntry, FileRecord, base_name},
    object_store::{ObjectStore, ObjectStoreError, UploadInfo},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::SqlitePool;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};

/// Validity window of issued presigned URLs.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// A `pending` or `deleting` row older than this is treated as abandoned and
/// may be reclaimed by a new upload of the same key.
pub const STALE_CLAIM_AGE: Duration = Duration::from_secs(60 * 60);

const FILE_COLUMNS: &str = "id, file_name, bucket_name, object_name, size, content_type, etag,
     last_modified, location, version_id, expiration_rule_id, owner_id,
     created_at, updated_at, deleted_at";

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file `{object}` already exists in bucket `{bucket}`")]
    AlreadyExists { bucket: String, object: String },
    #[error("file `{object}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, object: String },
    #[error("object store unavailable: {0}")]
    StoreUnavailable(#[from] ObjectStoreError),
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(#[from] sqlx::Error),
    #[error("{0}")]
    Validation(String),
}

pub type FileResult<T> = Result<T, FileError>;

/// Parameters of an upload from a server-side source file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: String,
    pub object: String,
    pub source_path: PathBuf,
    pub content_type: Option<String>,
    pub owner_id: Option<i64>,
}

#[derive(Clone)]
pub struct FileService {
    db: Arc<SqlitePool>,
    store: Arc<dyn ObjectStore>,
    preview_base_url: String,
}

impl FileService {
    pub fn new(
        db: Arc<SqlitePool>,
        store: Arc<dyn ObjectStore>,
        preview_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            store,
            preview_base_url: preview_base_url.into(),
        }
    }

    /// Upload `source_path` as (bucket, object) and record its metadata.
    pub async fn upload(&self, req: UploadRequest) -> FileResult<FileRecord> {
        ensure_bucket_name_safe(&req.bucket)?;
        ensure_key_safe(&req.object)?;
        let source_meta = fs::metadata(&req.source_path).await.map_err(|err| {
            FileError::Validation(format!(
                "source file `{}` is not readable: {}",
                req.source_path.display(),
                err
            ))
        })?;
        if !source_meta.is_file() {
            return Err(FileError::Validation(format!(
                "source path `{}` is not a regular file",
                req.source_path.display()
            )));
        }

        if self.find_optional(&req.bucket, &req.object).await?.is_some() {
            return Err(already_exists(&req.bucket, &req.object));
        }

        self.ensure_bucket(&req.bucket).await?;

        let file_name = base_name(&req.source_path.to_string_lossy()).to_string();
        let content_type = req.content_type.clone().or_else(|| {
            mime_guess::from_path(&req.source_path)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });

        let id = self
            .claim_key(&req.bucket, &req.object, &file_name, content_type.as_deref(), req.owner_id)
            .await?;

        let info = match self
            .store
            .put_object_from_file(
                &req.bucket,
                &req.object,
                &req.source_path,
                content_type.as_deref(),
            )
            .await
        {
            Ok(info) => info,
            Err(err) => {
                self.release_claim(id).await;
                return Err(err.into());
            }
        };

        let record = match finalize_upload(&self.db, id, &info).await {
            Ok(record) => record,
            Err(err) => {
                self.discard_object(&req.bucket, &req.object).await;
                self.release_claim(id).await;
                return Err(err.into());
            }
        };

        info!(
            "Successfully uploaded {} to {}/{}",
            req.source_path.display(),
            req.bucket,
            req.object
        );
        Ok(record)
    }

    /// Copy a recorded object to `destination` on the server.
    pub async fn download(&self, bucket: &str, object: &str, destination: &Path) -> FileResult<()> {
        if destination.as_os_str().is_empty() {
            return Err(FileError::Validation("download path is required".into()));
        }
        self.find(bucket, object).await?;

        self.store
            .get_object_to_file(bucket, object, destination)
            .await?;

        info!(
            "Successfully downloaded {} to {}",
            object,
            destination.display()
        );
        Ok(())
    }

    /// Remove the metadata row and the object.
    ///
    /// The row is marked `deleting` while the object is removed, then
    /// soft-deleted. A store failure puts the row back to `ready`. A row left
    /// in `deleting` is hidden from lookups and a repeated delete finishes it.
    pub async fn delete(&self, bucket: &str, object: &str) -> FileResult<()> {
        let now = Utc::now();
        let marked = sqlx::query_scalar::<_, i64>(
            "UPDATE files SET state = 'deleting', updated_at = ?
             WHERE bucket_name = ? AND object_name = ? AND deleted_at IS NULL
               AND state IN ('ready', 'deleting')
             RETURNING id",
        )
        .bind(now)
        .bind(bucket)
        .bind(object)
        .fetch_optional(&*self.db)
        .await?;
        let Some(id) = marked else {
            return Err(not_found(bucket, object));
        };

        if let Err(err) = self.store.remove_object(bucket, object).await {
            let restored = sqlx::query(
                "UPDATE files SET state = 'ready', updated_at = ?
                 WHERE id = ? AND state = 'deleting'",
            )
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.db)
            .await;
            if let Err(db_err) = restored {
                error!(
                    "object {}/{} was kept but its row could not be restored: {}",
                    bucket, object, db_err
                );
            }
            return Err(err.into());
        }

        let now = Utc::now();
        let deleted = sqlx::query("UPDATE files SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&*self.db)
            .await;
        if let Err(err) = deleted {
            error!(
                "object {}/{} was removed but its metadata delete failed: {}",
                bucket, object, err
            );
            return Err(err.into());
        }

        info!("Successfully deleted {} from {}", object, bucket);
        Ok(())
    }

    /// List objects under `prefix` straight from the store.
    ///
    /// Any failure during the listing discards what was collected so far.
    pub async fn list(&self, bucket: &str, prefix: &str) -> FileResult<Vec<FileEntry>> {
        ensure_bucket_name_safe(bucket)?;

        let entries: Vec<FileEntry> = self
            .store
            .list_objects(bucket, prefix)
            .map_ok(|object| FileEntry {
                file_name: base_name(&object.key).to_string(),
                bucket_name: bucket.to_string(),
                object_name: object.key,
                size: object.size,
                last_modified: object.last_modified,
                etag: object.etag,
            })
            .try_collect()
            .await?;

        Ok(entries)
    }

    /// Issue a GET URL valid for [`PRESIGNED_URL_TTL`].
    pub async fn presigned_url(&self, bucket: &str, object: &str) -> FileResult<String> {
        self.find(bucket, object).await?;
        let url = self
            .store
            .presigned_get_object(bucket, object, PRESIGNED_URL_TTL)
            .await?;
        Ok(url)
    }

    /// Build a deep link into the document preview service.
    pub async fn preview_url(&self, bucket: &str, object: &str) -> FileResult<String> {
        let record = self.find(bucket, object).await?;
        let presigned = self
            .store
            .presigned_get_object(bucket, object, PRESIGNED_URL_TTL)
            .await?;

        let preview = format!(
            "{}&fullfilename={}",
            presigned,
            urlencoding::encode(&record.file_name)
        );
        let encoded = general_purpose::STANDARD.encode(preview);
        Ok(format!(
            "{}?url={}",
            self.preview_base_url,
            urlencoding::encode(&encoded)
        ))
    }

    /// Fetch the live metadata row for (bucket, object).
    pub async fn find(&self, bucket: &str, object: &str) -> FileResult<FileRecord> {
        self.find_optional(bucket, object)
            .await?
            .ok_or_else(|| not_found(bucket, object))
    }

    async fn find_optional(&self, bucket: &str, object: &str) -> FileResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files
             WHERE bucket_name = ? AND object_name = ? AND deleted_at IS NULL
               AND state = 'ready'",
            FILE_COLUMNS
        ))
        .bind(bucket)
        .bind(object)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Insert a `pending` row for the key. The partial unique index settles
    /// racing uploads: the loser gets `AlreadyExists` before touching the store.
    async fn claim_key(
        &self,
        bucket: &str,
        object: &str,
        file_name: &str,
        content_type: Option<&str>,
        owner_id: Option<i64>,
    ) -> FileResult<i64> {
        let mut reclaimed = false;
        loop {
            let now = Utc::now();
            let claimed = sqlx::query_scalar::<_, i64>(
                "INSERT INTO files (file_name, bucket_name, object_name, size, content_type,
                                    owner_id, state, created_at, updated_at)
                 VALUES (?, ?, ?, 0, ?, ?, 'pending', ?, ?)
                 RETURNING id",
            )
            .bind(file_name)
            .bind(bucket)
            .bind(object)
            .bind(content_type)
            .bind(owner_id)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await;

            match claimed {
                Ok(id) => return Ok(id),
                Err(err) if is_unique_violation(&err) => {
                    if reclaimed || !self.reclaim_stale(bucket, object).await? {
                        return Err(already_exists(bucket, object));
                    }
                    reclaimed = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Retire an abandoned `pending`/`deleting` row holding the key.
    async fn reclaim_stale(&self, bucket: &str, object: &str) -> FileResult<bool> {
        let holder = sqlx::query_as::<_, (i64, String, DateTime<Utc>)>(
            "SELECT id, state, updated_at FROM files
             WHERE bucket_name = ? AND object_name = ? AND deleted_at IS NULL",
        )
        .bind(bucket)
        .bind(object)
        .fetch_optional(&*self.db)
        .await?;

        let Some((id, state, updated_at)) = holder else {
            return Ok(false);
        };
        let age = Utc::now().signed_duration_since(updated_at);
        if state == "ready" || age.to_std().map_or(true, |age| age < STALE_CLAIM_AGE) {
            return Ok(false);
        }

        let now = Utc::now();
        let retired = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ?
             WHERE id = ? AND state = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(&state)
        .execute(&*self.db)
        .await?;
        if retired.rows_affected() == 1 {
            warn!(
                "reclaimed abandoned {} row for {}/{} (last touched {})",
                state, bucket, object, updated_at
            );
        }
        Ok(retired.rows_affected() == 1)
    }

    /// Drop a `pending` row after a failed upload.
    async fn release_claim(&self, id: i64) {
        let released = sqlx::query("DELETE FROM files WHERE id = ? AND state = 'pending'")
            .bind(id)
            .execute(&*self.db)
            .await;
        if let Err(err) = released {
            error!("failed to release upload claim {}: {}", id, err);
        }
    }

    /// Create the bucket, tolerating the case where it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> FileResult<()> {
        match self.store.make_bucket(bucket).await {
            Ok(()) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            Err(create_err) => match self.store.bucket_exists(bucket).await {
                Ok(true) => {
                    info!("Bucket {} already exists", bucket);
                    Ok(())
                }
                Ok(false) | Err(_) => Err(FileError::StoreUnavailable(create_err)),
            },
        }
    }

    async fn discard_object(&self, bucket: &str, object: &str) {
        match self.store.remove_object(bucket, object).await {
            Ok(()) => warn!(
                "metadata for {}/{} could not be recorded; removed the uploaded object",
                bucket, object
            ),
            Err(err) => error!(
                "metadata for {}/{} could not be recorded and the object could not be removed, it is orphaned: {}",
                bucket, object, err
            ),
        }
    }
}

async fn finalize_upload(
    db: &SqlitePool,
    id: i64,
    info: &UploadInfo,
) -> Result<FileRecord, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(&format!(
        "UPDATE files
         SET size = ?, etag = ?, last_modified = ?, location = ?, version_id = ?,
             expiration_rule_id = ?, state = 'ready', updated_at = ?
         WHERE id = ? AND state = 'pending'
         RETURNING {}",
        FILE_COLUMNS
    ))
    .bind(info.size)
    .bind(&info.etag)
    .bind(info.last_modified)
    .bind(&info.location)
    .bind(&info.version_id)
    .bind(&info.expiration_rule_id)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await
}

fn already_exists(bucket: &str, object: &str) -> FileError {
    FileError::AlreadyExists {
        bucket: bucket.to_string(),
        object: object.to_string(),
    }
}

fn not_found(bucket: &str, object: &str) -> FileError {
    FileError::NotFound {
        bucket: bucket.to_string(),
        object: object.to_string(),
    }
}

/// Reject keys that are empty, too long, absolute, contain `..` or control
/// bytes, or have `.`/empty path segments (which includes a trailing `/`).
/// Accepted keys list back from the store unchanged.
fn ensure_key_safe(key: &str) -> FileResult<()> {
    let invalid = |reason: &str| Err(FileError::Validation(format!("invalid object name: {}", reason)));
    if key.is_empty() {
        return invalid("must not be empty");
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return invalid("longer than 1024 bytes");
    }
    if key.starts_with('/') || key.contains("..") {
        return invalid("must be relative and must not contain `..`");
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return invalid("contains control characters or backslashes");
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == ".") {
        return invalid("must not contain empty or `.` path segments");
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> FileResult<()> {
    let invalid = |reason: &str| {
        Err(FileError::Validation(format!(
            "bucket `{}` invalid: {}",
            name, reason
        )))
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return invalid("must be between 3 and 63 characters");
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return invalid("must start and end with a lowercase letter or digit");
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }

    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
