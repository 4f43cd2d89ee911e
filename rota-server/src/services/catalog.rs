//! Listing and pruning of snapshot files in the backup directory.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::models::backup::{BackupKind, CatalogEntry};
use crate::utils::clock::Clock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub full: usize,
    pub incremental: usize,
    pub total_bytes: u64,
}

pub struct BackupCatalog {
    backup_dir: PathBuf,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
}

impl BackupCatalog {
    pub fn new(backup_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Snapshot files, newest first. An unreadable directory lists as empty.
    pub async fn list(&self) -> Vec<CatalogEntry> {
        match self.scan().await {
            Ok(mut entries) => {
                entries.sort_by(|a, b| b.created.cmp(&a.created));
                entries
            }
            Err(e) => {
                error!(dir = %self.backup_dir.display(), error = %e, "Failed to list backups");
                Vec::new()
            }
        }
    }

    async fn scan(&self) -> std::io::Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };

        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name().to_string_lossy().to_string();
            let Some(kind) = BackupKind::from_file_name(&file_name) else {
                continue;
            };
            let meta = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Skipping unreadable backup file");
                    continue;
                }
            };

            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let created = created_from_name(&file_name, kind)
                .or_else(|| meta.created().ok().map(DateTime::<Utc>::from))
                .unwrap_or(modified);

            entries.push(CatalogEntry {
                file_path: item.path(),
                file_name,
                size: meta.len(),
                created,
                modified,
                kind,
            });
        }
        Ok(entries)
    }

    /// Find a backup by id. An exact id match wins, otherwise the newest file
    /// whose name contains the id.
    pub async fn find(&self, backup_id: &str) -> Option<CatalogEntry> {
        if backup_id.is_empty() {
            return None;
        }
        let entries = self.list().await;
        let exact = entries
            .iter()
            .position(|e| backup_id_of(&e.file_name) == backup_id);
        let index =
            exact.or_else(|| entries.iter().position(|e| e.file_name.contains(backup_id)))?;
        entries.into_iter().nth(index)
    }

    pub async fn delete_older_than(&self, retention_days: u32) -> usize {
        self.delete_older_than_at(retention_days, self.clock.now()).await
    }

    /// Delete snapshots created before `now - retention_days`. Files that fail
    /// to delete are logged and skipped. Returns how many were deleted.
    pub async fn delete_older_than_at(&self, retention_days: u32, now: DateTime<Utc>) -> usize {
        // A cutoff before the earliest representable instant keeps everything.
        let Some(cutoff) = TimeDelta::try_days(i64::from(retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            info!(retention_days, "Retention reaches past the earliest date, nothing to delete");
            return 0;
        };
        let mut deleted = 0;

        for entry in self.list().await {
            if entry.created >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&entry.file_path).await {
                Ok(()) => {
                    deleted += 1;
                    info!(file = %entry.file_name, "Deleted old backup");
                }
                Err(e) => error!(file = %entry.file_name, error = %e, "Failed to delete backup"),
            }
        }

        info!(deleted, retention_days, "Retention cleanup finished");
        if let Some(metrics) = &self.metrics {
            metrics.record_retention(deleted);
        }
        deleted
    }

    pub async fn stats(&self) -> CatalogStats {
        self.list()
            .await
            .iter()
            .fold(CatalogStats::default(), |mut stats, entry| {
                match entry.kind {
                    BackupKind::Full => stats.full += 1,
                    BackupKind::Incremental => stats.incremental += 1,
                }
                stats.total_bytes += entry.size;
                stats
            })
    }
}

/// `backup_1700000000000.json.gz` -> `backup_1700000000000`.
fn backup_id_of(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Creation time encoded in the file name as epoch milliseconds.
fn created_from_name(file_name: &str, kind: BackupKind) -> Option<DateTime<Utc>> {
    let millis: String = file_name
        .strip_prefix(kind.prefix())?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    DateTime::from_timestamp_millis(millis.parse().ok()?)
}
