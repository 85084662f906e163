//! HTTP handlers for file operations.
//! Request fields use the camelCase names clients already send
//! (`bucketName`, `objectName`, `filePath`, `downloadPath`, `prefix`).

use crate::{
    errors::AppError,
    object_store::ObjectStoreError,
    services::file_service::{FileError, UploadRequest},
    state::AppState,
};
use axum::{
    Form, Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

/// Form body of `POST /files/upload`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadForm {
    pub bucket_name: String,
    pub object_name: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub owner_id: Option<i64>,
}

/// Query identifying one file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileQuery {
    pub bucket_name: String,
    pub object_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadQuery {
    pub bucket_name: String,
    pub object_name: String,
    pub download_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListQuery {
    pub bucket_name: String,
    pub prefix: String,
}

/// Signature parameters of a locally issued presigned URL.
#[derive(Debug, Deserialize)]
pub struct PresignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// `POST /files/upload`
pub async fn upload_file(
    State(state): State<AppState>,
    Form(form): Form<UploadForm>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .files
        .upload(UploadRequest {
            bucket: form.bucket_name,
            object: form.object_name,
            source_path: PathBuf::from(form.file_path),
            content_type: form.content_type.filter(|ct| !ct.is_empty()),
            owner_id: form.owner_id,
        })
        .await?;

    Ok(Json(json!({
        "message": "File uploaded successfully",
        "file": record,
    })))
}

/// `GET /files/download`
pub async fn download_file(
    State(state): State<AppState>,
    Query(q): Query<DownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    state
        .files
        .download(&q.bucket_name, &q.object_name, &PathBuf::from(q.download_path))
        .await?;

    Ok(Json(json!({ "message": "File downloaded successfully" })))
}

/// `DELETE /files`
pub async fn delete_file(
    State(state): State<AppState>,
    Query(q): Query<FileQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.files.delete(&q.bucket_name, &q.object_name).await?;

    Ok(Json(json!({ "message": "File deleted successfully" })))
}

/// `GET /files`
pub async fn list_files(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let files = state.files.list(&q.bucket_name, &q.prefix).await?;

    Ok(Json(json!({ "files": files })))
}

/// `GET /files/getPresignedURL`
pub async fn get_presigned_url(
    State(state): State<AppState>,
    Query(q): Query<FileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let url = state
        .files
        .presigned_url(&q.bucket_name, &q.object_name)
        .await?;

    Ok(Json(json!({ "presignedURL": url })))
}

/// `GET /files/view`
///
/// A missing file is a 404 here, unlike the other file routes.
pub async fn view_file(
    State(state): State<AppState>,
    Query(q): Query<FileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let url = state
        .files
        .preview_url(&q.bucket_name, &q.object_name)
        .await
        .map_err(|err| match err {
            FileError::NotFound { .. } => AppError::not_found(err.to_string()),
            other => other.into(),
        })?;

    Ok(Json(json!({ "previewURL": url })))
}

/// `GET /presigned/{bucket}/{*key}`: serve a URL signed by the local store.
pub async fn serve_presigned(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<PresignedQuery>,
) -> Result<Response, AppError> {
    let store = state
        .local_store
        .as_ref()
        .ok_or_else(|| AppError::not_found("presigned downloads are not served here"))?;

    store
        .verify_presigned(&bucket, &key, q.expires, &q.signature, Utc::now())
        .map_err(|err| AppError::forbidden(err.to_string()))?;

    let (file, len) = store.open_object(&bucket, &key).await.map_err(|err| match err {
        ObjectStoreError::NotFound { .. } => {
            AppError::not_found(err.to_string())
        }
        other => AppError::internal(other.to_string()),
    })?;

    let content_type = mime_guess::from_path(&key)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));

    Ok(response)
}
