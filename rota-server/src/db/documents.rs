//! Row-level access to the `documents` table.
//!
//! Every document is stored as its JSON body keyed by `(collection, id)`.
//! The `ts` column mirrors the body's `_ts` property and is assigned on write.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::store::{QueryFilter, StoreError, MODIFIED_FIELD};

pub fn query_page(
    conn: &Connection,
    collection: &str,
    filter: &QueryFilter,
    after_id: Option<&str>,
    limit: usize,
) -> Result<Vec<Value>, StoreError> {
    let mut sql = String::from("SELECT body FROM documents WHERE collection = ?");
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];

    if let Some(since) = filter.modified_since {
        sql.push_str(" AND ts >= ?");
        args.push(SqlValue::Integer(since));
    }
    if let Some((field, value)) = &filter.field_equals {
        sql.push_str(" AND json_extract(body, ?) = ?");
        args.push(SqlValue::Text(format!("$.{field}")));
        args.push(to_sql_value(value));
    }
    if let Some(after) = after_id {
        sql.push_str(" AND id > ?");
        args.push(SqlValue::Text(after.to_string()));
    }
    sql.push_str(" ORDER BY id LIMIT ?");
    args.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;

    let mut documents = Vec::new();
    for body in rows {
        documents.push(serde_json::from_str(&body?)?);
    }
    Ok(documents)
}

pub fn find_by_id(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<Value>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    match body {
        Some(b) => Ok(Some(serde_json::from_str(&b)?)),
        None => Ok(None),
    }
}

/// Insert or replace the document with the same id. Returns the stored body,
/// including the assigned modification timestamp.
pub fn upsert(
    conn: &Connection,
    collection: &str,
    document: Value,
    ts: i64,
) -> Result<Value, StoreError> {
    let Value::Object(mut body) = document else {
        return Err(StoreError::MissingId);
    };
    let id = match body.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(StoreError::MissingId),
    };
    body.insert(MODIFIED_FIELD.to_string(), Value::from(ts));
    let body = Value::Object(body);

    conn.execute(
        "INSERT INTO documents (collection, id, body, ts) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, ts = excluded.ts",
        params![collection, id, serde_json::to_string(&body)?, ts],
    )?;
    Ok(body)
}

pub fn delete(conn: &Connection, collection: &str, id: &str) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )?;
    Ok(changed > 0)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
