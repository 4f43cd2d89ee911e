//! Prometheus metrics and their text exposition.
//!
//! Each [`Metrics`] owns its registry. HTTP traffic is recorded by the
//! [`track_http`](crate::middleware::metrics::track_http) layer, auth outcomes
//! by the bearer guard, and backup, restore and retention runs by their
//! services.

use std::sync::Arc;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::auth::AuthError;
use crate::models::backup::{BackupKind, BackupResult};
use crate::services::restore::RestoreResult;

pub struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_requests_in_flight: IntGauge,
    authentication_attempts_total: IntCounterVec,
    backup_runs_total: IntCounterVec,
    backup_records_total: IntCounterVec,
    restore_runs_total: IntCounterVec,
    restored_records_total: IntCounter,
    retention_deleted_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status_code"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["method", "route"],
        )?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "Number of HTTP requests being served",
        ))?;
        let authentication_attempts_total = IntCounterVec::new(
            Opts::new(
                "authentication_attempts_total",
                "Bearer token checks by outcome and rejection reason",
            ),
            &["status", "reason"],
        )?;
        let backup_runs_total = IntCounterVec::new(
            Opts::new("backup_runs_total", "Backup runs by kind and outcome"),
            &["kind", "status"],
        )?;
        let backup_records_total = IntCounterVec::new(
            Opts::new("backup_records_total", "Records written to snapshot files"),
            &["kind"],
        )?;
        let restore_runs_total = IntCounterVec::new(
            Opts::new("restore_runs_total", "Restore runs by outcome"),
            &["status"],
        )?;
        let restored_records_total = IntCounter::new(
            "restored_records_total",
            "Records upserted back into the store by restores",
        )?;
        let retention_deleted_total = IntCounter::new(
            "backup_retention_deleted_total",
            "Snapshot files removed by retention cleanup",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(authentication_attempts_total.clone()))?;
        registry.register(Box::new(backup_runs_total.clone()))?;
        registry.register(Box::new(backup_records_total.clone()))?;
        registry.register(Box::new(restore_runs_total.clone()))?;
        registry.register(Box::new(restored_records_total.clone()))?;
        registry.register(Box::new(retention_deleted_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            authentication_attempts_total,
            backup_runs_total,
            backup_records_total,
            restore_runs_total,
            restored_records_total,
            retention_deleted_total,
        })
    }

    pub fn observe_request(&self, method: &str, route: &str, status_code: u16, seconds: f64) {
        let status_code = status_code.to_string();
        self.http_requests_total
            .with_label_values(&[method, route, status_code.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, route])
            .observe(seconds);
    }

    /// Counts a request as in flight until the guard drops.
    pub fn track_in_flight(self: &Arc<Self>) -> InFlightGuard {
        self.http_requests_in_flight.inc();
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub fn record_auth(&self, outcome: Result<(), &AuthError>) {
        let (status, reason) = match outcome {
            Ok(()) => ("success", "none"),
            Err(e) => ("failure", e.kind()),
        };
        self.authentication_attempts_total
            .with_label_values(&[status, reason])
            .inc();
    }

    pub fn record_backup(&self, kind: BackupKind, result: &BackupResult) {
        let kind = kind_label(kind);
        self.backup_runs_total
            .with_label_values(&[kind, status_label(result.success)])
            .inc();
        if let Some(records) = result.record_count {
            self.backup_records_total
                .with_label_values(&[kind])
                .inc_by(records as u64);
        }
    }

    pub fn record_restore(&self, result: &RestoreResult) {
        self.restore_runs_total
            .with_label_values(&[status_label(result.success)])
            .inc();
        if let Some(records) = result.records_restored {
            self.restored_records_total.inc_by(records as u64);
        }
    }

    pub fn record_retention(&self, deleted: usize) {
        self.retention_deleted_total.inc_by(deleted as u64);
    }

    /// Text exposition format, with its content type.
    pub fn encode(&self) -> Result<(String, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut encoded = Vec::new();
        encoder.encode(&self.registry.gather(), &mut encoded)?;
        Ok((
            encoder.format_type().to_string(),
            String::from_utf8_lossy(&encoded).into_owned(),
        ))
    }
}

pub struct InFlightGuard {
    metrics: Arc<Metrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.http_requests_in_flight.dec();
    }
}

fn kind_label(kind: BackupKind) -> &'static str {
    match kind {
        BackupKind::Full => "full",
        BackupKind::Incremental => "incremental",
    }
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

#[cfg(test)]
impl Metrics {
    pub fn http_requests(&self, method: &str, route: &str, status_code: u16) -> u64 {
        self.http_requests_total
            .with_label_values(&[method, route, status_code.to_string().as_str()])
            .get()
    }

    pub fn in_flight(&self) -> i64 {
        self.http_requests_in_flight.get()
    }

    pub fn auth_attempts(&self, status: &str, reason: &str) -> u64 {
        self.authentication_attempts_total
            .with_label_values(&[status, reason])
            .get()
    }

    pub fn backup_runs(&self, kind: BackupKind, status: &str) -> u64 {
        self.backup_runs_total
            .with_label_values(&[kind_label(kind), status])
            .get()
    }

    pub fn backup_records(&self, kind: BackupKind) -> u64 {
        self.backup_records_total
            .with_label_values(&[kind_label(kind)])
            .get()
    }

    pub fn restore_runs(&self, status: &str) -> u64 {
        self.restore_runs_total.with_label_values(&[status]).get()
    }

    pub fn restored_records(&self) -> u64 {
        self.restored_records_total.get()
    }

    pub fn retention_deleted(&self) -> u64 {
        self.retention_deleted_total.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exposes_every_family() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_request("GET", "/api/health", 200, 0.004);
        metrics.record_auth(Err(&AuthError::Expired));
        metrics.record_retention(3);

        let (content_type, body) = metrics.encode().unwrap();

        assert!(content_type.starts_with("text/plain"));
        for family in [
            "http_requests_total",
            "http_request_duration_seconds",
            "authentication_attempts_total",
            "backup_retention_deleted_total 3",
        ] {
            assert!(body.contains(family), "missing {family}");
        }
        assert_eq!(metrics.http_requests("GET", "/api/health", 200), 1);
        assert_eq!(metrics.auth_attempts("failure", "expired"), 1);
    }

    #[test]
    fn test_in_flight_guard_decrements_on_drop() {
        let metrics = Arc::new(Metrics::new().unwrap());

        let guard = metrics.track_in_flight();
        assert_eq!(metrics.in_flight(), 1);
        drop(guard);

        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_auth(Ok(()));

        assert_eq!(first.auth_attempts("success", "none"), 1);
        assert_eq!(second.auth_attempts("success", "none"), 0);
    }
}
