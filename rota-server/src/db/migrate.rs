use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  id TEXT NOT NULL,
  body TEXT NOT NULL,
  ts INTEGER NOT NULL,
  PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection_ts ON documents(collection, ts);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting document store migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}

#[cfg(test)]
pub(crate) const SCHEMA_FOR_TESTS: &str = SCHEMA;
