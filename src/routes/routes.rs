//! Defines every HTTP route of the drive service.
//!
//! ## Structure
//! - **Users**
//!   - `POST   /users` — register
//!   - `GET    /users/{id}` — fetch
//!   - `PUT    /users/{id}` — partial update
//!   - `DELETE /users/{id}` — soft-delete
//!
//! - **Files**
//!   - `POST   /files/upload` — upload a server-local file (form body)
//!   - `GET    /files/download` — download to a server-local path
//!   - `GET    /files` — list a bucket by prefix
//!   - `DELETE /files` — delete object and metadata
//!   - `GET    /files/getPresignedURL` — time-limited GET URL
//!   - `GET    /files/view` — document preview deep link
//!
//! - **Misc**
//!   - `GET /health`
//!   - `GET /presigned/{bucket}/{*key}` — serves URLs signed by the disk store.
//!     The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_file, get_presigned_url, list_files, serve_presigned,
            upload_file, view_file,
        },
        health_handlers::health,
        user_handlers::{create_user, delete_user, get_user, update_user},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Users
        .route("/users", post(create_user))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        // Files
        .route("/files", get(list_files).delete(delete_file))
        .route("/files/upload", post(upload_file))
        .route("/files/download", get(download_file))
        .route("/files/getPresignedURL", get(get_presigned_url))
        .route("/files/view", get(view_file))
        .route("/presigned/{bucket}/{*key}", get(serve_presigned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        object_store::LocalObjectStore,
        services::{file_service::FileService, user_service::UserService},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const PUBLIC: &str = "http://127.0.0.1:3000";

    struct TestApp {
        dir: tempfile::TempDir,
        router: Router,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(test_pool(&dir).await);
            let store =
                Arc::new(LocalObjectStore::new(dir.path().join("objects"), PUBLIC, b"k").unwrap());
            let state = AppState {
                db: db.clone(),
                files: FileService::new(
                    db.clone(),
                    store.clone(),
                    "http://127.0.0.1:8012/onlinePreview",
                ),
                users: UserService::new(db),
                local_store: Some(store),
            };
            Self {
                dir,
                router: routes().with_state(state),
            }
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, body.to_vec())
        }

        async fn json(&self, req: Request<Body>) -> (StatusCode, Value) {
            let (status, body) = self.send(req).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        fn source(&self, name: &str, content: &[u8]) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path.display().to_string()
        }

        async fn upload(&self, bucket: &str, object: &str, path: &str) -> (StatusCode, Value) {
            let form = format!(
                "bucketName={}&objectName={}&filePath={}",
                bucket,
                urlencoding::encode(object),
                urlencoding::encode(path)
            );
            self.json(
                Request::post("/files/upload")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form))
                    .unwrap(),
            )
            .await
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn user_crud_over_http() {
        let app = TestApp::new().await;

        let (status, created) = app
            .json(json_request(
                Method::POST,
                "/users",
                json!({"username": "alice", "password": "s3cret", "email": "a@example.com"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(created.get("password_hash").is_none());
        let id = created["id"].as_i64().unwrap();

        let (status, dup) = app
            .json(json_request(
                Method::POST,
                "/users",
                json!({"username": "alice", "password": "x"}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(dup["status"], 400);

        let (status, updated) = app
            .json(json_request(
                Method::PUT,
                &format!("/users/{}", id),
                json!({"nickname": "Al"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["nickname"], "Al");
        assert_eq!(updated["username"], "alice");

        let (status, body) = app
            .json(
                Request::delete(format!("/users/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "User deleted successfully");

        let (status, _) = app.json(get(&format!("/users/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_list_and_fetch_through_presigned_url() {
        let app = TestApp::new().await;
        let path = app.source("report.pdf", b"%PDF-1.4 body");

        let (status, body) = app.upload("docs", "2024/report.pdf", &path).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["message"], "File uploaded successfully");

        let (status, body) = app.upload("docs", "2024/report.pdf", &path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("already exists"));

        let (status, body) = app.json(get("/files?bucketName=docs&prefix=2024/")).await;
        assert_eq!(status, StatusCode::OK);
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["object_name"], "2024/report.pdf");
        assert_eq!(files[0]["size"], 13);

        let (status, body) = app
            .json(get(
                "/files/getPresignedURL?bucketName=docs&objectName=2024/report.pdf",
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let url = body["presignedURL"].as_str().unwrap();
        let relative = url.strip_prefix(PUBLIC).unwrap();

        let resp = app.router.clone().oneshot(get(relative)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4 body");

        let tampered = format!("{}0", relative);
        let (status, _) = app.send(get(&tampered)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn view_reports_missing_file_as_not_found() {
        let app = TestApp::new().await;
        let path = app.source("notes.txt", b"notes");
        app.upload("docs", "notes.txt", &path).await;

        let (status, body) = app
            .json(get("/files/view?bucketName=docs&objectName=notes.txt"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body["previewURL"]
                .as_str()
                .unwrap()
                .starts_with("http://127.0.0.1:8012/onlinePreview?url=")
        );

        let (status, body) = app
            .json(get("/files/view?bucketName=docs&objectName=missing.txt"))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn download_and_delete() {
        let app = TestApp::new().await;
        let path = app.source("a.txt", b"alpha");
        app.upload("docs", "a.txt", &path).await;

        let target = app.dir.path().join("out").join("a.txt");
        let uri = format!(
            "/files/download?bucketName=docs&objectName=a.txt&downloadPath={}",
            urlencoding::encode(&target.display().to_string())
        );
        let (status, body) = app.json(get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "File downloaded successfully");
        assert_eq!(std::fs::read(&target).unwrap(), b"alpha");

        let (status, _) = app
            .json(get(
                "/files/download?bucketName=docs&objectName=missing.txt&downloadPath=/tmp/x",
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let delete = || {
            Request::delete("/files?bucketName=docs&objectName=a.txt")
                .body(Body::empty())
                .unwrap()
        };
        let (status, body) = app.json(delete()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "File deleted successfully");

        let (status, _) = app.json(delete()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_without_bucket_is_bad_request() {
        let app = TestApp::new().await;

        let (status, body) = app.json(get("/files?prefix=a/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let (status, body) = app.json(get("/files?bucketName=empty")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], json!([]));
    }

    #[tokio::test]
    async fn health_reports_pool_stats() {
        let app = TestApp::new().await;
        let (status, body) = app.json(get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "up");
        assert_eq!(body["max_connections"], "4");
    }
}
