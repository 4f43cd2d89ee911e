use crate::auth::VerifiedIdentity;
use crate::error::AppError;
use crate::models::helper::{CreateHelperRequest, Helper, UpdateHelperRequest};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_helpers).post(create_helper))
        .route("/{id}", get(get_helper).patch(update_helper).delete(delete_helper))
        .route("/search/parkrun-id/{parkrun_id}", get(find_by_parkrun_id))
}

fn caller(identity: Option<Extension<VerifiedIdentity>>) -> Result<VerifiedIdentity, AppError> {
    identity
        .map(|Extension(identity)| identity)
        .ok_or_else(|| AppError::Unauthorized("No authenticated user".into()))
}

async fn list_helpers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Helper>>, AppError> {
    Ok(Json(state.helpers.list().await?))
}

async fn get_helper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Helper>, AppError> {
    Ok(Json(state.helpers.get(&id).await?))
}

async fn find_by_parkrun_id(
    State(state): State<Arc<AppState>>,
    Path(parkrun_id): Path<String>,
) -> Result<Json<Vec<Helper>>, AppError> {
    Ok(Json(state.helpers.find_by_parkrun_id(&parkrun_id).await?))
}

async fn create_helper(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<VerifiedIdentity>>,
    Json(body): Json<CreateHelperRequest>,
) -> Result<(StatusCode, Json<Helper>), AppError> {
    let user = caller(identity)?;
    let helper = state.helpers.create(body, &user.user_id).await?;
    Ok((StatusCode::CREATED, Json(helper)))
}

async fn update_helper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Option<Extension<VerifiedIdentity>>,
    Json(body): Json<UpdateHelperRequest>,
) -> Result<Json<Helper>, AppError> {
    let user = caller(identity)?;
    Ok(Json(state.helpers.update(&id, body, &user.user_id).await?))
}

async fn delete_helper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.helpers.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
