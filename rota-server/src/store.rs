//! Document store seam.
//!
//! Collections hold schemaless JSON documents keyed by their `id` property.
//! The store stamps every write with a server-side modification time in
//! `_ts` (epoch seconds), which incremental backups select on.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::connection::DbPool;
use crate::db::documents;
use crate::utils::clock::Clock;

/// Server-assigned modification time, epoch seconds.
pub const MODIFIED_FIELD: &str = "_ts";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("document must be a JSON object with a non-empty string id")]
    MissingId,

    #[error("document {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("malformed stored document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Restricts a collection query. The default matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    /// Only documents whose `_ts` is at or after this epoch second.
    pub modified_since: Option<i64>,
    /// Only documents whose top-level `field` equals the value.
    pub field_equals: Option<(String, Value)>,
}

impl QueryFilter {
    pub fn modified_since(epoch_secs: i64) -> Self {
        Self {
            modified_since: Some(epoch_secs),
            ..Self::default()
        }
    }

    pub fn field_equals(field: impl Into<String>, value: Value) -> Self {
        Self {
            field_equals: Some((field.into(), value)),
            ..Self::default()
        }
    }
}

/// One page of query results. `continuation` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<Value>,
    pub continuation: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query_page(
        &self,
        collection: &str,
        filter: &QueryFilter,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<Page, StoreError>;

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or replace by `id`. Returns the stored document.
    async fn upsert(&self, collection: &str, document: Value) -> Result<Value, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Drain every page of a query, appending pages in iteration order.
pub async fn query_all(
    store: &dyn DocumentStore,
    collection: &str,
    filter: &QueryFilter,
    page_size: usize,
) -> Result<Vec<Value>, StoreError> {
    let mut documents = Vec::new();
    let mut continuation = None;
    loop {
        let page = store
            .query_page(collection, filter, continuation, page_size.max(1))
            .await?;
        documents.extend(page.documents);
        match page.continuation {
            Some(next) => continuation = Some(next),
            None => break,
        }
    }
    Ok(documents)
}

/// SQLite-backed store. Blocking calls run on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn query_page(
        &self,
        collection: &str,
        filter: &QueryFilter,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let collection = collection.to_string();
        let filter = filter.clone();
        let documents = self
            .blocking(move |conn| {
                let continuation = continuation.as_deref();
                documents::query_page(conn, &collection, &filter, continuation, page_size)
            })
            .await?;

        let continuation = if documents.len() == page_size {
            documents
                .last()
                .and_then(|d| d.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };
        Ok(Page {
            documents,
            continuation,
        })
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| documents::find_by_id(conn, &collection, &id))
            .await
    }

    async fn upsert(&self, collection: &str, document: Value) -> Result<Value, StoreError> {
        let collection = collection.to_string();
        let ts = self.clock.now().timestamp();
        self.blocking(move |conn| documents::upsert(conn, &collection, document, ts))
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| documents::delete(conn, &collection, &id))
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.blocking(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::system_store;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_all_walks_every_page() {
        let (_dir, store) = system_store();
        for i in 0..7 {
            store
                .upsert("helpers", json!({"id": format!("h{i}")}))
                .await
                .unwrap();
        }

        let all = query_all(&store, "helpers", &QueryFilter::default(), 3)
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["h0", "h1", "h2", "h3", "h4", "h5", "h6"]);
    }

    #[tokio::test]
    async fn test_upsert_stamps_modification_time() {
        let (_dir, store) = system_store();
        let before = chrono::Utc::now().timestamp();
        let stored = store
            .upsert("schedules", json!({"id": "2024-01-06", "assignments": {}}))
            .await
            .unwrap();

        assert!(stored[MODIFIED_FIELD].as_i64().unwrap() >= before);
        let read = store.read("schedules", "2024-01-06").await.unwrap().unwrap();
        assert_eq!(read, stored);
        store.ping().await.unwrap();
    }
}
