//! Full and incremental snapshots of the document store.
//!
//! Each run reads every backed-up collection, isolating per-collection
//! failures, and writes one snapshot file into the backup directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_compression::tokio::bufread::GzipEncoder;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use crate::metrics::Metrics;
use crate::models::backup::{
    BackupKind, BackupManifest, BackupOptions, BackupResult, ContainerSnapshot, SnapshotFile,
    COMPRESSED_SUFFIX, SNAPSHOT_VERSION,
};
use crate::store::{query_all, DocumentStore, QueryFilter};
use crate::utils::clock::Clock;

/// Collections included in every snapshot, in file order.
pub const BACKUP_COLLECTIONS: [&str; 2] = ["helpers", "schedules"];

static LAST_BACKUP_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Milliseconds used in a backup id: `now_millis`, or one past the last id
/// handed out if that is later. Ids never repeat within a process.
fn next_backup_millis(now_millis: i64) -> i64 {
    let mut last = LAST_BACKUP_MILLIS.load(Ordering::SeqCst);
    loop {
        let next = now_millis.max(last + 1);
        match LAST_BACKUP_MILLIS.compare_exchange_weak(
            last,
            next,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

pub struct SnapshotWriter {
    store: Arc<dyn DocumentStore>,
    backup_dir: PathBuf,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
}

impl SnapshotWriter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backup_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            backup_dir: backup_dir.into(),
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn create_full_backup(&self, options: &BackupOptions) -> BackupResult {
        self.create_backup(options, None).await
    }

    /// Snapshot only documents modified at or after `since`.
    pub async fn create_incremental_backup(
        &self,
        since: DateTime<Utc>,
        options: &BackupOptions,
    ) -> BackupResult {
        self.create_backup(options, Some(since)).await
    }

    /// Runs one backup. A cutoff makes it incremental. Never fails: errors
    /// are reported in the returned result.
    pub async fn create_backup(
        &self,
        options: &BackupOptions,
        since: Option<DateTime<Utc>>,
    ) -> BackupResult {
        let started = Instant::now();
        let kind = if since.is_some() {
            BackupKind::Incremental
        } else {
            BackupKind::Full
        };
        let timestamp = self.clock.now();
        let backup_id = format!(
            "{}{}",
            kind.prefix(),
            next_backup_millis(timestamp.timestamp_millis())
        );

        match since {
            Some(since) => info!(
                backup_id = %backup_id,
                since = %since.to_rfc3339(),
                "Starting incremental backup"
            ),
            None => info!(backup_id = %backup_id, "Starting full backup"),
        }

        let manifest = BackupManifest {
            backup_id: backup_id.clone(),
            timestamp,
            kind,
            since,
            version: SNAPSHOT_VERSION.to_string(),
        };
        let snapshot = SnapshotFile {
            metadata: manifest,
            containers: self.read_collections(options, since).await,
        };
        let record_count = snapshot.record_count();

        let outcome = self.write_snapshot(&backup_id, &snapshot, options.compress).await;
        let duration = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok((file_path, file_size)) => {
                info!(
                    backup_id = %backup_id,
                    records = record_count,
                    bytes = file_size,
                    duration_ms = duration,
                    "Backup completed"
                );
                BackupResult {
                    success: true,
                    backup_id,
                    timestamp,
                    file_path: Some(file_path),
                    file_size: Some(file_size),
                    record_count: Some(record_count),
                    duration: Some(duration),
                    error: None,
                }
            }
            Err(e) => {
                error!(backup_id = %backup_id, duration_ms = duration, error = %e, "Backup failed");
                BackupResult {
                    success: false,
                    backup_id,
                    timestamp,
                    file_path: None,
                    file_size: None,
                    record_count: None,
                    duration: Some(duration),
                    error: Some(format!("{e:#}")),
                }
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_backup(kind, &result);
        }
        result
    }

    async fn read_collections(
        &self,
        options: &BackupOptions,
        since: Option<DateTime<Utc>>,
    ) -> BTreeMap<String, ContainerSnapshot> {
        let filter = since
            .map(|s| QueryFilter::modified_since(s.timestamp()))
            .unwrap_or_default();

        let reads = BACKUP_COLLECTIONS.iter().map(|&collection| {
            let filter = &filter;
            async move {
                let read =
                    query_all(self.store.as_ref(), collection, filter, options.batch_size).await;
                let snapshot = match read {
                    Ok(mut records) => {
                        if !options.include_metadata {
                            records.iter_mut().for_each(strip_system_properties);
                        }
                        info!(collection, records = records.len(), "Backed up collection");
                        ContainerSnapshot::Records(records)
                    }
                    Err(e) => {
                        error!(collection, error = %e, "Failed to back up collection");
                        ContainerSnapshot::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                (collection.to_string(), snapshot)
            }
        });

        join_all(reads).await.into_iter().collect()
    }

    async fn write_snapshot(
        &self,
        backup_id: &str,
        snapshot: &SnapshotFile,
        compress: bool,
    ) -> anyhow::Result<(PathBuf, u64)> {
        let json = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;
        let bytes = if compress {
            let mut encoder = GzipEncoder::new(json.as_slice());
            let mut compressed = Vec::new();
            encoder.read_to_end(&mut compressed).await.context("compressing snapshot")?;
            compressed
        } else {
            json
        };

        let file_name = format!(
            "{backup_id}.json{}",
            if compress { COMPRESSED_SUFFIX } else { "" }
        );
        let path = self.backup_dir.join(&file_name);
        write_new_file(&self.backup_dir, &file_name, &bytes).await?;
        Ok((path, bytes.len() as u64))
    }
}

/// Drop server-managed properties (`_ts` and friends) from a stored document.
fn strip_system_properties(record: &mut Value) {
    if let Value::Object(map) = record {
        map.retain(|key, _| !key.starts_with('_'));
    }
}

/// Write through a hidden temp file, then link it into place. Fails instead of
/// replacing an existing file of the same name.
async fn write_new_file(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating backup directory {}", dir.display()))?;

    let final_path = dir.join(file_name);
    let temp_path = dir.join(format!(".{file_name}.tmp"));
    tokio::fs::write(&temp_path, bytes)
        .await
        .with_context(|| format!("writing {}", temp_path.display()))?;

    let linked = tokio::fs::hard_link(&temp_path, &final_path).await;
    let _ = tokio::fs::remove_file(&temp_path).await;
    linked.with_context(|| format!("publishing {}", final_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{system_store, temp_store};
    use crate::store::{MockDocumentStore, Page, StoreError};
    use crate::utils::clock::testing::ManualClock;
    use crate::utils::clock::SystemClock;
    use async_compression::tokio::bufread::GzipDecoder;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    async fn read_snapshot(path: &Path) -> SnapshotFile {
        let bytes = tokio::fs::read(path).await.unwrap();
        if path.to_string_lossy().ends_with(COMPRESSED_SUFFIX) {
            let mut decoder = GzipDecoder::new(bytes.as_slice());
            let mut json = Vec::new();
            decoder.read_to_end(&mut json).await.unwrap();
            serde_json::from_slice(&json).unwrap()
        } else {
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    #[test]
    fn test_backup_ids_never_repeat() {
        let a = next_backup_millis(1_700_000_000_000);
        let b = next_backup_millis(1_700_000_000_000);
        let c = next_backup_millis(1);
        assert!(b > a);
        assert!(c > b);
    }

    #[tokio::test]
    async fn test_full_backup_writes_compressed_snapshot() {
        let (_db, store) = system_store();
        store.upsert("helpers", json!({"id": "h1", "name": "Ann"})).await.unwrap();
        store.upsert("helpers", json!({"id": "h2", "name": "Bea"})).await.unwrap();
        store.upsert("schedules", json!({"id": "2024-01-06"})).await.unwrap();
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let writer = SnapshotWriter::new(Arc::new(store), dir.path(), Arc::new(SystemClock))
            .with_metrics(metrics.clone());

        let result = writer.create_full_backup(&BackupOptions::default()).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.backup_id.starts_with("backup_"));
        assert_eq!(result.record_count, Some(3));
        assert_eq!(metrics.backup_runs(BackupKind::Full, "success"), 1);
        assert_eq!(metrics.backup_records(BackupKind::Full), 3);
        let path = result.file_path.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}.json.gz", result.backup_id)
        );
        assert_eq!(result.file_size, Some(std::fs::metadata(&path).unwrap().len()));

        let snapshot = read_snapshot(&path).await;
        assert_eq!(snapshot.metadata.kind, BackupKind::Full);
        assert_eq!(snapshot.metadata.version, "1.0.0");
        assert!(snapshot.metadata.since.is_none());
        assert_eq!(snapshot.record_count(), 3);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_incremental_backup_keeps_only_recent_changes() {
        let start = Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let (_db, store) = temp_store(clock.clone());
        store.upsert("helpers", json!({"id": "old"})).await.unwrap();
        clock.advance(chrono::Duration::days(2));
        store.upsert("helpers", json!({"id": "new"})).await.unwrap();

        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(Arc::new(store), dir.path(), clock.clone());
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let options = BackupOptions {
            compress: false,
            ..BackupOptions::default()
        };

        let result = writer.create_incremental_backup(since, &options).await;

        assert!(result.success);
        assert!(result.backup_id.starts_with("incremental_"));
        let path = result.file_path.unwrap();
        assert!(path.to_string_lossy().ends_with(".json"));
        let snapshot = read_snapshot(&path).await;
        assert_eq!(snapshot.metadata.kind, BackupKind::Incremental);
        assert_eq!(snapshot.metadata.since, Some(since));
        let ContainerSnapshot::Records(helpers) = &snapshot.containers["helpers"] else {
            panic!("helpers should have records");
        };
        let ids: Vec<_> = helpers.iter().map(|h| h["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["new"]);
        for record in helpers {
            assert!(record["_ts"].as_i64().unwrap() >= since.timestamp());
        }
    }

    #[tokio::test]
    async fn test_failed_collection_is_recorded_and_run_continues() {
        let mut store = MockDocumentStore::new();
        store
            .expect_query_page()
            .returning(|collection, _, _, _| match collection {
                "helpers" => Ok(Page {
                    documents: vec![json!({"id": "h1"}), json!({"id": "h2"})],
                    continuation: None,
                }),
                _ => Err(StoreError::Unavailable("request timed out".into())),
            });
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(Arc::new(store), dir.path(), Arc::new(SystemClock));

        let result = writer.create_full_backup(&BackupOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.record_count, Some(2));
        let snapshot = read_snapshot(&result.file_path.unwrap()).await;
        assert_eq!(
            snapshot.containers["schedules"],
            ContainerSnapshot::Failed {
                error: "store unavailable: request timed out".into()
            }
        );
        assert_eq!(
            snapshot.containers["helpers"],
            ContainerSnapshot::Records(vec![json!({"id": "h1"}), json!({"id": "h2"})])
        );
    }

    #[tokio::test]
    async fn test_pages_are_appended_in_order() {
        let mut store = MockDocumentStore::new();
        store
            .expect_query_page()
            .returning(|_, _, continuation, page_size| {
                assert_eq!(page_size, 2);
                Ok(match continuation.as_deref() {
                    None => Page {
                        documents: vec![json!({"id": "a"}), json!({"id": "b"})],
                        continuation: Some("b".into()),
                    },
                    Some(_) => Page {
                        documents: vec![json!({"id": "c"})],
                        continuation: None,
                    },
                })
            });
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(Arc::new(store), dir.path(), Arc::new(SystemClock));

        let result = writer
            .create_full_backup(&BackupOptions::with_batch_size(2))
            .await;

        let snapshot = read_snapshot(&result.file_path.unwrap()).await;
        assert_eq!(
            snapshot.containers["helpers"],
            ContainerSnapshot::Records(vec![
                json!({"id": "a"}),
                json!({"id": "b"}),
                json!({"id": "c"}),
            ])
        );
    }

    #[tokio::test]
    async fn test_metadata_is_stripped_when_not_requested() {
        let (_db, store) = system_store();
        store.upsert("helpers", json!({"id": "h1", "name": "Ann"})).await.unwrap();
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(Arc::new(store), dir.path(), Arc::new(SystemClock));
        let options = BackupOptions {
            include_metadata: false,
            compress: false,
            ..BackupOptions::default()
        };

        let result = writer.create_full_backup(&options).await;

        let snapshot = read_snapshot(&result.file_path.unwrap()).await;
        assert_eq!(
            snapshot.containers["helpers"],
            ContainerSnapshot::Records(vec![json!({"id": "h1", "name": "Ann"})])
        );
    }

    #[tokio::test]
    async fn test_unwritable_directory_reports_failure() {
        let (_db, store) = system_store();
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let writer = SnapshotWriter::new(Arc::new(store), &blocker, Arc::new(SystemClock))
            .with_metrics(metrics.clone());

        let result = writer.create_full_backup(&BackupOptions::default()).await;

        assert!(!result.success);
        assert_eq!(metrics.backup_runs(BackupKind::Full, "failure"), 1);
        assert!(result.error.is_some());
        assert!(result.duration.is_some());
        assert!(result.file_path.is_none());
    }
}
