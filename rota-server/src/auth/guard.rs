//! Bearer token gate for protected routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::auth::errors::AuthError;
use crate::auth::verifier::TokenVerifier;
use crate::metrics::Metrics;
use crate::middleware::correlation::CorrelationId;

/// State for [`require_bearer`].
#[derive(Clone)]
pub struct BearerAuth {
    pub verifier: Arc<TokenVerifier>,
    pub metrics: Arc<Metrics>,
}

/// Verifies the `Authorization: Bearer` token and attaches the
/// [`VerifiedIdentity`](crate::auth::verifier::VerifiedIdentity) as a request
/// extension. Any failure ends the request with 401.
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    mut req: Request,
    next: Next,
) -> Response {
    let result = match bearer_token(&req) {
        Some(token) => auth.verifier.verify(token).await,
        None => Err(AuthError::MissingToken),
    };
    auth.metrics.record_auth(result.as_ref().map(|_| ()));

    match result {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => unauthorized(&req, &e),
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme == "Bearer" && !token.is_empty()).then_some(token)
}

fn unauthorized(req: &Request, error: &AuthError) -> Response {
    let correlation_id = req
        .extensions()
        .get::<CorrelationId>()
        .map(|c| c.as_str().to_string());
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    warn!(
        reason = error.kind(),
        %path,
        %method,
        correlation_id = correlation_id.as_deref().unwrap_or("-"),
        "Rejected request: {error}"
    );

    let body = json!({
        "statusCode": StatusCode::UNAUTHORIZED.as_u16(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "path": path,
        "method": method,
        "message": error.to_string(),
        "correlationId": correlation_id,
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
