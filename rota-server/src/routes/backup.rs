use crate::error::AppError;
use crate::models::backup::{BackupOptions, BackupResult, CatalogEntry};
use crate::services::restore::RestoreStage;
use crate::state::AppState;
use bytes::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/full", post(create_full_backup))
        .route("/incremental", post(create_incremental_backup))
        .route("/list", get(list_backups))
        .route("/restore/{backup_id}", post(restore_backup))
        .route("/cleanup", delete(cleanup_backups))
}

/// Parse an optional JSON body. An empty body yields the defaults.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))
}

fn backup_response(result: BackupResult) -> Response {
    let status = if result.success {
        StatusCode::CREATED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

async fn create_full_backup(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let options: BackupOptions = parse_body(&body)?;
    let result = state.snapshots.create_full_backup(&options).await;
    Ok(backup_response(result))
}

#[derive(Debug, Default, Deserialize)]
struct IncrementalRequest {
    since: Option<String>,
    #[serde(flatten)]
    options: BackupOptions,
}

/// Accepts RFC 3339, a date-time without offset (taken as UTC), or a bare date.
fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

async fn create_incremental_backup(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: IncrementalRequest = parse_body(&body)?;
    let Some(raw) = request.since else {
        return Err(AppError::BadRequest("since is required".into()));
    };
    let since = parse_since(&raw).ok_or_else(|| {
        AppError::BadRequest("Invalid date format. Please provide a valid ISO date string.".into())
    })?;

    let result = state
        .snapshots
        .create_incremental_backup(since, &request.options)
        .await;
    Ok(backup_response(result))
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Json<Vec<CatalogEntry>> {
    Json(state.catalog.list().await)
}

#[derive(Deserialize)]
pub struct RestoreQuery {
    pub container: Option<String>,
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(backup_id): Path<String>,
    Query(query): Query<RestoreQuery>,
) -> Result<Response, AppError> {
    let target = query.container.as_deref().filter(|c| !c.is_empty());
    let result = state.restore.restore(&backup_id, target).await;

    match result.stage {
        RestoreStage::Locating => Err(AppError::NotFound(result.message)),
        _ if result.success => Ok(Json(result).into_response()),
        _ => Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    pub retention_days: Option<u32>,
}

async fn cleanup_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> Json<serde_json::Value> {
    let retention_days = query.retention_days.unwrap_or(state.config.retention_days);
    let deleted = state.catalog.delete_older_than(retention_days).await;
    Json(json!({
        "deletedCount": deleted,
        "message": format!("Deleted {deleted} old backup files"),
    }))
}
