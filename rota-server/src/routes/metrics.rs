//! Prometheus scrape endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// GET /api/metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok((content_type, body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::create_router;
    use crate::routes::testing::request;
    use crate::state::testing::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn text_body(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_scrape_reports_traffic_auth_and_backups() {
        let fixture = test_state(|_| {});
        let metrics = fixture.state.metrics.clone();
        let app = create_router(fixture.state.clone());

        app.clone()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        app.clone()
            .oneshot(Request::builder().uri("/api/helpers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        app.clone()
            .oneshot(request("POST", "/api/backup/full", None))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/api/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = text_body(response).await;
        assert!(body.contains("http_requests_total"));
        assert!(body.contains("route=\"/api/health\""));
        assert!(body.contains("backup_runs_total"));
        assert!(!body.contains("route=\"/api/metrics\""));

        assert_eq!(metrics.http_requests("GET", "/api/health", 200), 1);
        assert_eq!(metrics.http_requests("GET", "/api/helpers", 401), 1);
        assert_eq!(metrics.http_requests("POST", "/api/backup/full", 201), 1);
        assert_eq!(metrics.auth_attempts("failure", "missing_token"), 1);
        assert_eq!(metrics.auth_attempts("success", "none"), 1);
        assert_eq!(
            metrics.backup_runs(crate::models::backup::BackupKind::Full, "success"),
            1
        );
        assert_eq!(metrics.in_flight(), 0);
    }
}
