//! Disk-backed object store.
//!
//! Payloads live under `base_path/{bucket}/{shard}/{shard}/{key}` where the
//! shards are the first two bytes of `md5(bucket/key)`. The entity tag is the
//! hex MD5 of the payload. Signed GET URLs carry an expiry timestamp and an
//! HMAC-SHA256 over `GET\n{bucket}\n{key}\n{expires}`.

use super::{ObjectInfo, ObjectStore, ObjectStoreError, ObjectStream, UploadInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, pin_mut, stream};
use hmac::{Hmac, Mac};
use md5::Context;
use sha2::Sha256;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Error, PartialEq)]
pub enum PresignError {
    #[error("presigned URL has expired")]
    Expired,
    #[error("presigned URL signature does not match")]
    BadSignature,
}

pub struct LocalObjectStore {
    base_path: PathBuf,
    public_base_url: String,
    signer: HmacSha256,
}

impl LocalObjectStore {
    /// Create a store rooted at `base_path`. Signed URLs are issued against
    /// `public_base_url`, the externally reachable address of this service.
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_key: impl AsRef<[u8]>,
    ) -> Result<Self, std::io::Error> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        let signer = HmacSha256::new_from_slice(signing_key.as_ref())
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidInput, err.to_string()))?;
        Ok(Self {
            base_path,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.signer.clone();
        mac.update(format!("GET\n{}\n{}\n{}", bucket, key, expires).as_bytes());
        mac
    }

    /// Check a signed GET request produced by `presigned_get_object`.
    pub fn verify_presigned(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PresignError> {
        let provided = hex::decode(signature).map_err(|_| PresignError::BadSignature)?;
        self.signature(bucket, key, expires)
            .verify_slice(&provided)
            .map_err(|_| PresignError::BadSignature)?;
        if now.timestamp() >= expires {
            return Err(PresignError::Expired);
        }
        Ok(())
    }

    /// Open an object payload for streaming, returning the file and its length.
    pub async fn open_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(File, u64), ObjectStoreError> {
        let path = self.object_path(bucket, key);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Remove empty shard directories up to (excluding) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn make_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        fs::create_dir(self.bucket_root(bucket)).await?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        match fs::metadata(self.bucket_root(bucket)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        _content_type: Option<&str>,
    ) -> Result<UploadInfo, ObjectStoreError> {
        if !self.bucket_exists(bucket).await? {
            return Err(ObjectStoreError::BucketNotFound(bucket.to_string()));
        }

        let file_path = self.object_path(bucket, key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ObjectStoreError::Backend("object path has no parent".into()))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        let source_file = File::open(source).await?;
        let stream = ReaderStream::new(source_file);
        pin_mut!(stream);
        let mut file = File::create(&tmp_path).await?;

        let mut size: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ObjectStoreError::Io(err));
                }
            };
            size += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        Ok(UploadInfo {
            etag: Some(format!("{:x}", digest.compute())),
            size,
            last_modified: Utc::now(),
            location: Some(file_path.display().to_string()),
            version_id: None,
            expiration_rule_id: None,
        })
    }

    async fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), ObjectStoreError> {
        let (source, _) = self.open_object(bucket, key).await?;

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let part_path = PathBuf::from(format!("{}.part", destination.display()));
        let mut reader = source;
        let mut out = File::create(&part_path).await?;
        let copied = async {
            tokio::io::copy(&mut reader, &mut out).await?;
            out.sync_all().await
        }
        .await;
        drop(out);
        if let Err(err) = copied {
            let _ = fs::remove_file(&part_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        fs::rename(&part_path, destination).await?;
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> ObjectStream {
        let root = self.bucket_root(bucket);
        let prefix = prefix.to_string();

        // Directories are walked depth-first, one directory per poll.
        // Depth 0 is the bucket root, depths 1 and 2 are shard levels.
        stream::try_unfold(vec![(root.clone(), 0usize)], move |mut dirs| {
            let root = root.clone();
            let prefix = prefix.clone();
            async move {
                while let Some((dir, depth)) = dirs.pop() {
                    let mut entries = match fs::read_dir(&dir).await {
                        Ok(entries) => entries,
                        Err(err) if depth == 0 && err.kind() == ErrorKind::NotFound => {
                            return Ok(None);
                        }
                        Err(err) => return Err(ObjectStoreError::Io(err)),
                    };

                    let mut batch = Vec::new();
                    while let Some(entry) = entries.next_entry().await? {
                        let path = entry.path();
                        let file_type = entry.file_type().await?;
                        if file_type.is_dir() {
                            dirs.push((path, depth + 1));
                            continue;
                        }
                        if depth < 2 || entry.file_name().to_string_lossy().starts_with(TMP_PREFIX)
                        {
                            continue;
                        }
                        let Some(key) = key_from_path(&root, &path) else {
                            continue;
                        };
                        if !key.starts_with(&prefix) {
                            continue;
                        }
                        let meta = entry.metadata().await?;
                        batch.push(ObjectInfo {
                            key,
                            size: meta.len() as i64,
                            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                            etag: None,
                        });
                    }

                    if !batch.is_empty() {
                        return Ok(Some((batch, dirs)));
                    }
                }
                Ok::<_, ObjectStoreError>(None)
            }
        })
        .map_ok(|batch| stream::iter(batch.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, ObjectStoreError> {
        let expires = Utc::now().timestamp() + expiry.as_secs() as i64;
        let signature = hex::encode(self.signature(bucket, key, expires).finalize().into_bytes());
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!(
            "{}/presigned/{}/{}?expires={}&signature={}",
            self.public_base_url,
            urlencoding::encode(bucket),
            encoded_key,
            expires,
            signature
        ))
    }
}

/// Recover the object key from a payload path by dropping the two shard levels.
fn key_from_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .skip(2)
        .map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
