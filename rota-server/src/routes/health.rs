//! Health, liveness and readiness endpoints. All public.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

async fn database_status(state: &AppState) -> &'static str {
    match state.store.ping().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the document store");
            "down"
        }
    }
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database = database_status(&state).await;

    Json(json!({
        "status": if database == "up" { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "database": database,
    }))
}

/// GET /api/health/live: the process is up and serving.
pub async fn liveness(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// GET /api/health/ready: 503 until the document store answers.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let database = database_status(&state).await;
    let (status, label) = if database == "up" {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (status, Json(json!({ "status": label, "database": database })))
}

/// GET /api/health/detailed
pub async fn detailed(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database = database_status(&state).await;
    let stats = state.catalog.stats().await;
    let latest = state.catalog.list().await.into_iter().next();

    Json(json!({
        "status": if database == "up" { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "database": database,
        "backups": {
            "automated": state.config.automated_backups,
            "retentionDays": state.config.retention_days,
            "full": stats.full,
            "incremental": stats.incremental,
            "totalBytes": stats.total_bytes,
            "latest": latest.map(|entry| json!({
                "fileName": entry.file_name,
                "created": entry.created,
                "type": entry.kind,
            })),
        },
    }))
}
