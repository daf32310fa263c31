//! Relational store collaborator and its SQLite implementation.
//!
//! The store is opened read-only and shared by every request through a small
//! round-robin pool of connections, each behind its own mutex.
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default number of pooled read connections.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Upper bound on pooled read connections.
const MAX_POOL_SIZE: usize = 8;

/// SQLite VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("open {path}: {message}")]
    Open { path: PathBuf, message: String },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("statement interrupted after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("statement is not read-only")]
    NotReadOnly,
    #[error("connection pool: {0}")]
    Pool(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// One result cell. Blobs keep only their length.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(usize),
}

impl CellValue {
    fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(v) => CellValue::Integer(v),
            ValueRef::Real(v) => CellValue::Real(v),
            ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Blob(bytes.len()),
        }
    }
}

/// Tabular result. `rows` holds at most the retain limit passed to
/// [`DataStore::query`]; `total_rows` counts every row the statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub total_rows: usize,
}

/// Catalog introspection plus read-statement execution.
pub trait DataStore: Send + Sync {
    /// Table names in catalog order.
    fn list_tables(&self) -> Result<Vec<String>, StoreError>;
    fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError>;
    /// Run one read statement, keeping at most `retain` rows and interrupting
    /// the statement once `timeout` elapses.
    fn query(&self, sql: &str, retain: usize, timeout: Duration) -> Result<ResultSet, StoreError>;
}

pub struct SqliteStore {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl SqliteStore {
    /// Open `pool_size` read-only connections to the database file.
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, StoreError> {
        let size = pool_size.clamp(1, MAX_POOL_SIZE);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|err| StoreError::Open {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
            conn.pragma_update(None, "query_only", true)?;
            conn.busy_timeout(Duration::from_millis(5_000))?;
            connections.push(Mutex::new(conn));
        }
        tracing::debug!(path = %path.display(), pool_size = size, "sqlite store opened");
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.connections.len()
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let guard = self.connections[idx]
            .lock()
            .map_err(|err| StoreError::Pool(format!("connection lock poisoned: {err}")))?;
        f(&guard)
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted)
}

impl DataStore for SqliteStore {
    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )?;
            let names = statement
                .query_map([], |row| row.get::<usize, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let pragma = format!("PRAGMA table_info({})", quote_literal(table));
        self.with_conn(|conn| {
            let mut statement = conn.prepare(&pragma)?;
            let columns = statement
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get::<usize, String>(1)?,
                        declared_type: row.get::<usize, Option<String>>(2)?.unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
    }

    fn query(&self, sql: &str, retain: usize, timeout: Duration) -> Result<ResultSet, StoreError> {
        if timeout.is_zero() {
            return Err(StoreError::Timeout(timeout));
        }
        self.with_conn(|conn| {
            let deadline = Instant::now() + timeout;
            conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
            let result = run_query(conn, sql, retain);
            conn.progress_handler(0, None::<fn() -> bool>);
            result.map_err(|err| match err {
                StoreError::Sqlite(ref inner) if is_interrupt(inner) => StoreError::Timeout(timeout),
                other => other,
            })
        })
    }
}

fn run_query(conn: &Connection, sql: &str, retain: usize) -> Result<ResultSet, StoreError> {
    let mut statement = conn.prepare(sql)?;
    if !statement.readonly() {
        return Err(StoreError::NotReadOnly);
    }
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let width = columns.len();

    let mut result = ResultSet {
        columns,
        rows: Vec::new(),
        total_rows: 0,
    };
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        result.total_rows += 1;
        if result.rows.len() < retain {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(CellValue::from_ref(row.get_ref(idx)?));
            }
            result.rows.push(cells);
        }
    }
    Ok(result)
}
