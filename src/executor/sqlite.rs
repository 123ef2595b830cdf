use super::{QueryContext, QueryExecutor};
use crate::errors::{AppError, AppResult};
use crate::models::{ColumnMeta, QueryResult};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Executes read-only SQL against a SQLite data source file.
///
/// Each execution opens its own connection on the blocking pool and registers the
/// connection's interrupt handle under the query id, which is how `cancel` stops a
/// statement that overran its timeout.
#[derive(Clone)]
pub struct SqliteSourceExecutor {
    source_path: PathBuf,
    active: Arc<Mutex<HashMap<String, InterruptHandle>>>,
}

impl SqliteSourceExecutor {
    pub fn new(source_path: &Path) -> Self {
        Self {
            source_path: source_path.to_path_buf(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl QueryExecutor for SqliteSourceExecutor {
    async fn execute(&self, sql: &str, context: &QueryContext) -> AppResult<QueryResult> {
        if sql.trim().is_empty() {
            return Err(AppError::QueryExecution("SQL statement is empty".to_string()));
        }

        let source_path = self.source_path.clone();
        let active = self.active.clone();
        let sql = sql.to_string();
        let query_id = context.query_id.clone();
        let limit = context.limit as usize;

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &source_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(query_error)?;

            if let Ok(mut handles) = active.lock() {
                handles.insert(query_id.clone(), conn.get_interrupt_handle());
            }
            let result = run_query(&conn, &sql, limit);
            if let Ok(mut handles) = active.lock() {
                handles.remove(&query_id);
            }
            result
        })
        .await
        .map_err(|error| AppError::Internal(format!("query task failed: {}", error)))?
    }

    fn cancel(&self, context: &QueryContext) {
        let Ok(handles) = self.active.lock() else {
            return;
        };
        if let Some(handle) = handles.get(&context.query_id) {
            tracing::warn!(query_id = %context.query_id, "interrupting source query");
            handle.interrupt();
        }
    }
}

fn run_query(conn: &Connection, sql: &str, limit: usize) -> AppResult<QueryResult> {
    let mut stmt = conn.prepare(sql).map_err(query_error)?;
    let names = stmt
        .column_names()
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let mut types: Vec<Option<&'static str>> = vec![None; names.len()];

    let mut rows = stmt.query([]).map_err(query_error)?;
    let mut data = Vec::new();
    while data.len() < limit {
        let Some(row) = rows.next().map_err(query_error)? else {
            break;
        };
        let mut values = Vec::with_capacity(names.len());
        for (index, slot) in types.iter_mut().enumerate() {
            let (value, kind) = value_to_json(row.get_ref(index).map_err(query_error)?);
            if slot.is_none() {
                *slot = kind;
            }
            values.push(value);
        }
        data.push(values);
    }

    let columns = names
        .into_iter()
        .zip(types)
        .map(|(name, kind)| ColumnMeta {
            name,
            r#type: kind.unwrap_or("NULL").to_string(),
        })
        .collect();
    Ok(QueryResult { columns, data })
}

fn value_to_json(value: ValueRef<'_>) -> (serde_json::Value, Option<&'static str>) {
    match value {
        ValueRef::Null => (serde_json::Value::Null, None),
        ValueRef::Integer(number) => (serde_json::json!(number), Some("INTEGER")),
        ValueRef::Real(number) => (serde_json::json!(number), Some("REAL")),
        ValueRef::Text(bytes) => (
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Some("TEXT"),
        ),
        ValueRef::Blob(bytes) => (serde_json::Value::String(hex::encode(bytes)), Some("BLOB")),
    }
}

fn query_error(error: rusqlite::Error) -> AppError {
    AppError::QueryExecution(error.to_string())
}
