//! SQLite pool construction and schema migration.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, time::Duration};

const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

const MIN_IDLE_CONNECTIONS: u32 = 10;
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Open a pool against `database_url`, creating the database file if needed.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database URL `{}`", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(MIN_IDLE_CONNECTIONS.min(max_connections))
        .max_lifetime(MAX_CONNECTION_LIFETIME)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to `{}`", database_url))?;

    Ok(pool)
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("executing migration statement `{}`", stmt))?;
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
pub(crate) async fn test_pool(dir: &tempfile::TempDir) -> SqlitePool {
    let url = format!("sqlite://{}", dir.path().join("meta.db").display());
    let pool = connect(&url, 4).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'files') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["files", "users"]);
    }

    #[tokio::test]
    async fn partial_unique_index_ignores_deleted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let insert = "INSERT INTO files (file_name, bucket_name, object_name, created_at, updated_at, deleted_at)
                      VALUES ('a', 'docs', 'a.txt', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', ?)";

        sqlx::query(insert)
            .bind(Some("2024-01-02T00:00:00Z"))
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(insert)
            .bind(None::<String>)
            .execute(&pool)
            .await
            .unwrap();
        let err = sqlx::query(insert)
            .bind(None::<String>)
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
