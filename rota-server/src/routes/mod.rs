pub mod backup;
pub mod health;
pub mod helpers;
pub mod metrics;

use crate::auth::guard::{require_bearer, BearerAuth};
use crate::config::AppConfig;
use crate::middleware::correlation::{correlation_id, CORRELATION_HEADER};
use crate::middleware::metrics::track_http;
use crate::state::AppState;
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEV_FRONTEND_ORIGIN: &str = "http://localhost:3000";

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = BearerAuth {
        verifier: state.verifier.clone(),
        metrics: state.metrics.clone(),
    };
    let protected = Router::new()
        .nest("/backup", backup::router())
        .nest("/helpers", helpers::router())
        .route_layer(middleware::from_fn_with_state(auth, require_bearer));

    let api = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/health/detailed", get(health::detailed))
        .route("/metrics", get(metrics::metrics))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(state.metrics.clone(), track_http))
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state.config))
        .layer(middleware::from_fn(correlation_id))
        .with_state(state)
}

fn cors(config: &AppConfig) -> CorsLayer {
    let mut origins = vec![HeaderValue::from_static(DEV_FRONTEND_ORIGIN)];
    if config.frontend_url != DEV_FRONTEND_ORIGIN {
        match HeaderValue::from_str(&config.frontend_url) {
            Ok(origin) => origins.push(origin),
            Err(e) => {
                let url = &config.frontend_url;
                tracing::warn!(url = %url, error = %e, "Ignoring invalid FRONTEND_URL")
            }
        }
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, CORRELATION_HEADER])
        .expose_headers([CORRELATION_HEADER])
        .allow_credentials(true)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_protected_routes_require_a_token() {
        let fixture = test_state(|_| {});
        let app = create_router(fixture.state.clone());

        for (method, uri) in [
            ("GET", "/api/backup/list"),
            ("POST", "/api/backup/full"),
            ("DELETE", "/api/backup/cleanup"),
            ("GET", "/api/helpers"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert!(response.headers().contains_key("x-correlation-id"));
        }
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_frontend_origin() {
        let fixture = test_state(|config| config.frontend_url = "https://rota.example.org".into());
        let app = create_router(fixture.state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/helpers")
                    .header("origin", "https://rota.example.org")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://rota.example.org"
        );
    }
}
