//! Records persisted in the metadata database.
//!
//! Both map to tables via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod file;
pub mod user;
