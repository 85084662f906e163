use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, StatusCode},
};
use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod object_store;
mod routes;
mod services;
mod state;

use config::{AppConfig, StorageBackend};
use object_store::{LocalObjectStore, ObjectStore, S3ObjectStore};
use services::{file_service::FileService, user_service::UserService};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- .env + logging ---
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting cloud-drive with config: {:?}", cfg);

    // --- Database ---
    ensure_sqlite_parent(&cfg.database_url)?;
    let db = Arc::new(db::connect(&cfg.database_url, cfg.max_connections).await?);
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Object store ---
    let (store, local_store): (Arc<dyn ObjectStore>, Option<Arc<LocalObjectStore>>) =
        match cfg.storage_backend {
            StorageBackend::S3 => {
                let s3 = S3ObjectStore::connect(&cfg.s3).await;
                (Arc::new(s3) as Arc<dyn ObjectStore>, None)
            }
            StorageBackend::Local => {
                let secret = cfg.presign_secret.clone().unwrap_or_else(|| {
                    tracing::warn!(
                        "PRESIGN_SECRET is not set; presigned URLs will not survive a restart"
                    );
                    uuid::Uuid::new_v4().to_string()
                });
                let local = Arc::new(
                    LocalObjectStore::new(
                        cfg.local_storage_dir.clone(),
                        cfg.public_base_url.clone(),
                        secret,
                    )
                    .with_context(|| format!("opening {}", cfg.local_storage_dir))?,
                );
                tracing::info!("Serving objects from {}", local.base_path().display());
                (local.clone() as Arc<dyn ObjectStore>, Some(local))
            }
        };

    let state = AppState {
        db: db.clone(),
        files: FileService::new(db.clone(), store, cfg.preview_base_url.clone()),
        users: UserService::new(db),
        local_store,
    };

    // --- Build router ---
    let mut app: Router = routes::routes::routes().with_state(state);
    if let Some(dir) = &cfg.static_file_path {
        tracing::info!("Serving static files from {} at /static", dir);
        app = app.nest_service("/static", ServeDir::new(dir));
    }
    let app = app
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(cors_layer(cfg.cors_allow_origin.as_deref())?)
        .layer(TraceLayer::new_for_http());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// CORS for browser clients; a missing or `*` origin allows any.
fn cors_layer(origin: Option<&str>) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    Ok(match origin {
        None | Some("*") => layer.allow_origin(Any),
        Some(origin) => layer.allow_origin(
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("parsing CORS_ALLOW_ORIGIN `{}`", origin))?,
        ),
    })
}

/// SQLite creates the database file but not its directory.
fn ensure_sqlite_parent(database_url: &str) -> Result<()> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}
