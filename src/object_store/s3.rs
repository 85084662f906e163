//! S3-compatible backend built on `aws-sdk-s3`.

use super::{ObjectInfo, ObjectStore, ObjectStoreError, ObjectStream, UploadInfo};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, instrument};

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Settings {
    /// `host:port` or a full URL.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub region: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .field("region", &self.region)
            .finish()
    }
}

impl S3Settings {
    /// Endpoint URL with a scheme chosen by `use_ssl` when none is given.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint.trim_end_matches('/'))
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    endpoint: String,
}

impl S3ObjectStore {
    /// Build a path-style client with static credentials.
    #[instrument(skip_all, fields(endpoint = %settings.endpoint))]
    pub async fn connect(settings: &S3Settings) -> Self {
        let endpoint = settings.endpoint_url();
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "cloud-drive-static",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(endpoint.clone())
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        debug!("S3 client configured for {}", endpoint);
        Self {
            client: Client::from_conf(s3_config),
            endpoint,
        }
    }
}

fn backend<E>(err: E) -> ObjectStoreError
where
    E: std::error::Error + 'static,
{
    ObjectStoreError::Backend(DisplayErrorContext(err).to_string())
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

/// Extract `rule-id` from an `x-amz-expiration` header value such as
/// `expiry-date="Fri, 23 Dec 2012 00:00:00 GMT", rule-id="picture-deletion-rule"`.
fn parse_expiration_rule_id(header: &str) -> Option<String> {
    let start = header.find("rule-id=\"")? + "rule-id=\"".len();
    let rest = &header[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn make_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match err.as_service_error() {
                Some(service_err) if service_err.is_not_found() => Ok(false),
                _ => Err(backend(err)),
            },
        }
    }

    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: Option<&str>,
    ) -> Result<UploadInfo, ObjectStoreError> {
        let size = fs::metadata(source).await?.len() as i64;
        let body = ByteStream::from_path(source).await.map_err(backend)?;

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body);
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        let output = request.send().await.map_err(backend)?;

        Ok(UploadInfo {
            etag: output.e_tag().map(trim_etag),
            size,
            last_modified: Utc::now(),
            location: Some(format!("{}/{}/{}", self.endpoint, bucket, key)),
            version_id: output.version_id().map(str::to_string),
            expiration_rule_id: output.expiration().and_then(parse_expiration_rule_id),
        })
    }

    async fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), ObjectStoreError> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) => {
                return Err(match err.as_service_error() {
                    Some(service_err) if service_err.is_no_such_key() => {
                        ObjectStoreError::NotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        }
                    }
                    _ => backend(err),
                });
            }
        };

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let part_path = PathBuf::from(format!("{}.part", destination.display()));
        let mut file = File::create(&part_path).await?;
        let mut body = output.body;

        let written: Result<(), ObjectStoreError> = async {
            while let Some(chunk) = body.try_next().await.map_err(backend)? {
                file.write_all(&chunk).await?;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&part_path).await;
            return Err(err);
        }
        fs::rename(&part_path, destination).await?;
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> ObjectStream {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        // State is the continuation token of the next page; `None` once exhausted.
        stream::try_unfold(Some(None::<String>), move |state| {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();
            async move {
                let Some(token) = state else {
                    return Ok(None);
                };

                let mut request = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if let Some(token) = token {
                    request = request.continuation_token(token);
                }
                let page = match request.send().await {
                    Ok(page) => page,
                    Err(err) => {
                        return match err.as_service_error() {
                            Some(service_err) if service_err.is_no_such_bucket() => Ok(None),
                            _ => Err(backend(err)),
                        };
                    }
                };

                let batch = page
                    .contents()
                    .iter()
                    .filter_map(|object| {
                        Some(ObjectInfo {
                            key: object.key()?.to_string(),
                            size: object.size().unwrap_or_default(),
                            last_modified: object.last_modified().and_then(to_chrono),
                            etag: object.e_tag().map(trim_etag),
                        })
                    })
                    .collect::<Vec<_>>();

                let next = if page.is_truncated().unwrap_or(false) {
                    page.next_continuation_token()
                        .map(|token| Some(token.to_string()))
                } else {
                    None
                };
                Ok::<_, ObjectStoreError>(Some((batch, next)))
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
        let config = PresigningConfig::expires_in(expiry).map_err(backend)?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(backend)?;
        Ok(request.uri().to_string())
    }
}
