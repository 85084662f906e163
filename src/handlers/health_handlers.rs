//! Health handler.
//!
//! - GET /health -> database liveness plus connection pool statistics

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use std::collections::BTreeMap;

/// `GET /health`
///
/// Pings the database with `SELECT 1` and reports pool statistics.
/// Always answers 200; a failed ping shows up as `"status": "down"`.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut stats = BTreeMap::new();

    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => {
            stats.insert("status", "up".to_string());
            stats.insert("message", "It's healthy".to_string());
        }
        Ok(v) => {
            stats.insert("status", "down".to_string());
            stats.insert("error", format!("DB down: unexpected result {}", v));
        }
        Err(e) => {
            tracing::warn!("health check failed: {}", e);
            stats.insert("status", "down".to_string());
            stats.insert("error", format!("DB down: {}", e));
        }
    }

    let open = state.db.size();
    let idle = state.db.num_idle() as u32;
    stats.insert("open_connections", open.to_string());
    stats.insert("idle", idle.to_string());
    stats.insert("in_use", open.saturating_sub(idle).to_string());
    stats.insert(
        "max_connections",
        state.db.options().get_max_connections().to_string(),
    );

    (StatusCode::OK, Json(stats))
}
