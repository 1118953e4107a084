//! SQLite-backed catalog and execution engine

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Number, Value};
use tracing::{debug, error, info, warn};

use crate::catalog::{ColumnDescriptor, SchemaCatalog};
use crate::execution::{ExecutionEngine, QueryResult, Row};
use crate::utils::TextUtils;

const SAMPLE_VALUES_PER_COLUMN: usize = 3;

/// Read-only view of a SQLite file, usable as both the schema catalog and the
/// execution engine. All database work runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteDataSource {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteDataSource {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening data source at: {}", db_path.display());
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;
        Ok(Self { pool: Arc::new(pool) })
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))?;
            f(&conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Blocking database task failed: {}", e))?
    }
}

/// VM instructions between abandonment checks of a running query
const PROGRESS_CHECK_OPS: i32 = 1000;

/// Flags the query as abandoned when the awaiting future is dropped before it
/// finishes. The running statement sees the flag from its progress handler and
/// stops, so a timed-out or cancelled query frees its pooled connection.
struct AbandonOnDrop {
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!("Interrupting abandoned query");
            self.abandoned.store(true, Ordering::Relaxed);
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn value_to_sample(value: ValueRef<'_>) -> Option<String> {
    match value_to_json(value) {
        Value::Null => None,
        Value::String(s) => Some(TextUtils::preview(&s, 40).into_owned()),
        other => Some(other.to_string()),
    }
}

fn list_tables_blocking(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tables)
}

fn describe_blocking(conn: &Connection, table: &str) -> anyhow::Result<Vec<ColumnDescriptor>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    // cid, name, type, notnull, dflt_value, pk
    let columns = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(anyhow::anyhow!("Table not found: {}", table));
    }

    let mut descriptors = Vec::with_capacity(columns.len());
    for (name, data_type, not_null, pk) in columns {
        let sample_sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL LIMIT {n}",
            col = quote_ident(&name),
            table = quote_ident(table),
            n = SAMPLE_VALUES_PER_COLUMN,
        );
        let mut sample_stmt = conn.prepare(&sample_sql)?;
        let mut rows = sample_stmt.query([])?;
        let mut sample_values = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(sample) = value_to_sample(row.get_ref(0)?) {
                sample_values.push(sample);
            }
        }

        descriptors.push(ColumnDescriptor {
            name,
            data_type: if data_type.is_empty() { "ANY".to_string() } else { data_type },
            nullable: not_null == 0 && pk == 0,
            sample_values,
        });
    }
    Ok(descriptors)
}

fn execute_blocking(conn: &Connection, sql: &str) -> rusqlite::Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (idx, column) in columns.iter().enumerate() {
            record.insert(column.clone(), value_to_json(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(QueryResult::ok(columns, out))
}

#[async_trait]
impl SchemaCatalog for SqliteDataSource {
    async fn list_tables(&self) -> anyhow::Result<Vec<String>> {
        self.with_conn(list_tables_blocking).await
    }

    async fn describe(&self, table: &str) -> anyhow::Result<Vec<ColumnDescriptor>> {
        let table = table.to_string();
        self.with_conn(move |conn| describe_blocking(conn, &table)).await
    }
}

#[async_trait]
impl ExecutionEngine for SqliteDataSource {
    async fn execute(&self, sql: &str) -> anyhow::Result<QueryResult> {
        debug!("Executing query: {}", TextUtils::preview(sql, 100));
        let sql = sql.to_string();
        let pool = Arc::clone(&self.pool);
        let abandoned = Arc::new(AtomicBool::new(false));
        let mut guard = AbandonOnDrop {
            abandoned: Arc::clone(&abandoned),
            armed: true,
        };

        let task = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))?;
            if abandoned.load(Ordering::Relaxed) {
                debug!("Query abandoned before it started");
                return Ok(QueryResult::failed("Query abandoned before it started"));
            }

            let flag = Arc::clone(&abandoned);
            conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || flag.load(Ordering::Relaxed)));
            let start = Instant::now();
            let result = match execute_blocking(&conn, &sql) {
                Ok(result) => result,
                Err(e) => {
                    error!("Query failed: {}", e);
                    QueryResult::failed(e.to_string())
                }
            };
            // pooled connections carry no handler between queries
            conn.progress_handler(0, None::<fn() -> bool>);

            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            if result.success {
                info!("Query completed: {} rows in {:.2}ms", result.row_count, elapsed_ms);
            }
            Ok(result.with_timing(elapsed_ms))
        });

        let result = task
            .await
            .map_err(|e| anyhow::anyhow!("Blocking database task failed: {}", e))?;
        guard.armed = false;
        result
    }
}
