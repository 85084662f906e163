use crate::services::{file_service::FileError, user_service::UserError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("request failed with {}: {}", self.status, self.message);
        } else {
            tracing::debug!("request rejected with {}: {}", self.status, self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Precondition failures on files are client errors; store and database
/// failures are server errors.
impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        let status = match &err {
            FileError::AlreadyExists { .. }
            | FileError::NotFound { .. }
            | FileError::Validation(_) => StatusCode::BAD_REQUEST,
            FileError::StoreUnavailable(_) | FileError::DatabaseUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        let status = match &err {
            UserError::NotFound(_) => StatusCode::NOT_FOUND,
            UserError::AlreadyExists(_) | UserError::Validation(_) => StatusCode::BAD_REQUEST,
            UserError::Hashing(_) | UserError::DatabaseUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStoreError;

    #[test]
    fn file_errors_map_to_status_codes() {
        let exists: AppError = FileError::AlreadyExists {
            bucket: "docs".into(),
            object: "a.txt".into(),
        }
        .into();
        assert_eq!(exists.status, StatusCode::BAD_REQUEST);
        assert_eq!(exists.message, "file `a.txt` already exists in bucket `docs`");

        let store: AppError =
            FileError::StoreUnavailable(ObjectStoreError::Backend("down".into())).into();
        assert_eq!(store.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.message.contains("down"));
    }

    #[test]
    fn user_errors_map_to_status_codes() {
        let missing: AppError = UserError::NotFound(3).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let duplicate: AppError = UserError::AlreadyExists("email").into();
        assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);
        assert_eq!(duplicate.message, "user with this email already exists");
    }
}
