use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::helpers::HelperError;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, id } => {
                AppError::NotFound(format!("Document {id} not found in {collection}"))
            }
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<HelperError> for AppError {
    fn from(e: HelperError) -> Self {
        match e {
            HelperError::NotFound(_) => AppError::NotFound(e.to_string()),
            HelperError::DuplicateParkrunId(_) => AppError::Conflict(e.to_string()),
            HelperError::Invalid(_) => AppError::BadRequest(e.to_string()),
            HelperError::Store(inner) => inner.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "statusCode": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}
