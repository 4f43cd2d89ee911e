//! Replays a snapshot file into the live collections.
//!
//! Every record is upserted by id, so restoring the same snapshot twice
//! leaves the store as restoring it once. Per-record failures are counted
//! and logged; only failing to locate, read or parse the file fails the run.

use std::sync::Arc;

use anyhow::Context;
use async_compression::tokio::bufread::GzipDecoder;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::models::backup::{CatalogEntry, ContainerSnapshot, SnapshotFile, COMPRESSED_SUFFIX};
use crate::services::catalog::BackupCatalog;
use crate::store::DocumentStore;

/// How far a restore got before it finished or stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Locating,
    Reading,
    Parsing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_restored: Option<usize>,
    #[serde(skip)]
    pub stage: RestoreStage,
}

impl RestoreResult {
    fn failed(stage: RestoreStage, message: String) -> Self {
        Self {
            success: false,
            message,
            records_restored: None,
            stage,
        }
    }
}

pub struct RestoreExecutor {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<BackupCatalog>,
    metrics: Option<Arc<Metrics>>,
}

impl RestoreExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, catalog: Arc<BackupCatalog>) -> Self {
        Self {
            store,
            catalog,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Restore every collection in the backup, or only `target_collection`.
    pub async fn restore(&self, backup_id: &str, target_collection: Option<&str>) -> RestoreResult {
        let result = self.run(backup_id, target_collection).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_restore(&result);
        }
        result
    }

    async fn run(&self, backup_id: &str, target_collection: Option<&str>) -> RestoreResult {
        let Some(entry) = self.catalog.find(backup_id).await else {
            warn!(backup_id, "Backup not found for restore");
            return RestoreResult::failed(
                RestoreStage::Locating,
                format!("Backup with ID {backup_id} not found"),
            );
        };
        info!(backup_id, file = %entry.file_name, "Starting restore");

        let json = match read_snapshot_bytes(&entry).await {
            Ok(json) => json,
            Err(e) => {
                error!(backup_id, error = %e, "Failed to read backup file");
                return RestoreResult::failed(RestoreStage::Reading, format!("{e:#}"));
            }
        };
        let snapshot: SnapshotFile = match serde_json::from_slice(&json) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(backup_id, error = %e, "Failed to parse backup file");
                return RestoreResult::failed(
                    RestoreStage::Parsing,
                    format!("Backup file {} is not a valid snapshot: {e}", entry.file_name),
                );
            }
        };

        let mut restored = 0usize;
        let mut failed = 0usize;
        for (collection, contents) in &snapshot.containers {
            if target_collection.is_some_and(|target| target != collection.as_str()) {
                continue;
            }
            let records = match contents {
                ContainerSnapshot::Records(records) => records,
                ContainerSnapshot::Failed { error } => {
                    warn!(
                        collection = %collection,
                        error = %error,
                        "Skipping collection that failed at backup time"
                    );
                    continue;
                }
                ContainerSnapshot::Empty => {
                    debug!(collection = %collection, "Skipping empty collection entry");
                    continue;
                }
            };

            for record in records {
                match self.store.upsert(collection, record.clone()).await {
                    Ok(_) => restored += 1,
                    Err(e) => {
                        failed += 1;
                        let id = record
                            .get("id")
                            .map(|id| id.to_string())
                            .unwrap_or_default();
                        error!(
                            collection = %collection,
                            id = %id,
                            error = %e,
                            "Failed to restore record"
                        );
                    }
                }
            }
        }

        info!(backup_id, records = restored, failed, "Restore completed");
        RestoreResult {
            success: true,
            message: format!("Successfully restored {restored} records from backup {backup_id}"),
            records_restored: Some(restored),
            stage: RestoreStage::Done,
        }
    }
}

async fn read_snapshot_bytes(entry: &CatalogEntry) -> anyhow::Result<Vec<u8>> {
    let bytes = tokio::fs::read(&entry.file_path)
        .await
        .with_context(|| format!("reading {}", entry.file_path.display()))?;
    if !entry.file_name.ends_with(COMPRESSED_SUFFIX) {
        return Ok(bytes);
    }
    let mut json = Vec::new();
    GzipDecoder::new(bytes.as_slice())
        .read_to_end(&mut json)
        .await
        .with_context(|| format!("decompressing {}", entry.file_name))?;
    Ok(json)
}
