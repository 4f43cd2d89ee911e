//! Snapshot file layout and backup result types.
//!
//! A snapshot file is one JSON object:
//! `{"metadata": {..}, "containers": {"helpers": [..], "schedules": {"error": ".."}}}`,
//! optionally gzip-compressed when the file name ends in `.gz`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SNAPSHOT_VERSION: &str = "1.0.0";
pub const COMPRESSED_SUFFIX: &str = ".gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    /// File name prefix, shared by the writer and the catalog.
    pub fn prefix(self) -> &'static str {
        match self {
            BackupKind::Full => "backup_",
            BackupKind::Incremental => "incremental_",
        }
    }

    /// Classify a snapshot file name. `None` for files that are not snapshots.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.starts_with(BackupKind::Incremental.prefix()) {
            Some(BackupKind::Incremental)
        } else if name.starts_with(BackupKind::Full.prefix()) {
            Some(BackupKind::Full)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFormat {
    #[default]
    Json,
    /// Accepted for compatibility; written the same as `Json`.
    Ndjson,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupOptions {
    pub include_metadata: bool,
    pub compress: bool,
    pub format: BackupFormat,
    pub batch_size: usize,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            compress: true,
            format: BackupFormat::Json,
            batch_size: 1000,
        }
    }
}

impl BackupOptions {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub version: String,
}

/// One collection's entry in a snapshot: its records, or why reading it failed.
/// A `null` entry reads as `Empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContainerSnapshot {
    Failed { error: String },
    Records(Vec<Value>),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub metadata: BackupManifest,
    pub containers: BTreeMap<String, ContainerSnapshot>,
}

impl SnapshotFile {
    pub fn record_count(&self) -> usize {
        self.containers
            .values()
            .map(|c| match c {
                ContainerSnapshot::Records(records) => records.len(),
                ContainerSnapshot::Failed { .. } | ContainerSnapshot::Empty => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub file_name: String,
    pub file_path: PathBuf,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: BackupKind,
}
