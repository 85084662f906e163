//! Represents a user account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user account row.
///
/// `username`, `email` and `phone` are unique among non-deleted rows.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,

    /// bcrypt hash; never returned to clients.
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub gender: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nickname: String,
    pub introduce: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Payload for `POST /users`.
#[derive(Deserialize, Debug, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub gender: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub introduce: String,
    #[serde(default)]
    pub description: String,
}

/// Payload for `PUT /users/{id}`. Absent fields keep their stored value.
#[derive(Deserialize, Debug, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub password: Option<String>,
    pub gender: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nickname: Option<String>,
    pub introduce: Option<String>,
    pub description: Option<String>,
}
