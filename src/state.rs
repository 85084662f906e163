use crate::{
    object_store::LocalObjectStore,
    services::{file_service::FileService, user_service::UserService},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared handler state. Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub files: FileService,
    pub users: UserService,

    /// Set when the disk-backed store is active, so its signed URLs can be served.
    pub local_store: Option<Arc<LocalObjectStore>>,
}
