//! Request counting and timing for the Prometheus endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::metrics::Metrics;

pub async fn track_http(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let route = route_label(req.uri().path());
    if route == "/api/metrics" {
        return next.run(req).await;
    }

    let _in_flight = metrics.track_in_flight();
    let started = Instant::now();
    let response = next.run(req).await;
    metrics.observe_request(
        &method,
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Path with id-like segments (anything containing a digit) folded to `:id`,
/// so labels stay bounded.
pub fn route_label(path: &str) -> String {
    let route = path
        .split('/')
        .map(|segment| {
            if segment.bytes().any(|b| b.is_ascii_digit()) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    if route.is_empty() {
        "/".to_string()
    } else {
        route
    }
}
