// ── Relational store ──
//
// One SQLite connection behind a re-entrant lock. Every event application
// and every read takes the lock for the duration of one logical operation.
// Callers that need several reads to agree can hold `Store::lock()` across
// them; the same thread may re-acquire it freely. Never hold the guard
// across an `.await`.

mod ingest;
mod read;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::Serialize;
use tracing::debug;

use ndb_api::Value;

use crate::config::Storage;
use crate::error::NdbError;
use crate::schema;

pub use ingest::SeenKeys;
pub use read::Row;

/// Guard returned by [`Store::lock`].
pub type StoreGuard<'a> = ReentrantMutexGuard<'a, Connection>;

/// Result of an ad hoc query: column names plus rows of values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// The relational replica of every connected source.
pub struct Store {
    conn: ReentrantMutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open the store and (re)create every table.
    pub fn open(storage: &Storage) -> Result<Self, NdbError> {
        let conn = match storage {
            Storage::Memory => Connection::open_in_memory()?,
            Storage::File(path) => Connection::open(path)?,
        };

        // Rows are a replica of live sources, so nothing survives a restart.
        for table in schema::TABLES {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table.name))?;
            conn.execute_batch(&schema::create_sql(table))?;
        }
        debug!(?storage, tables = schema::TABLES.len(), "store opened");

        Ok(Self {
            conn: ReentrantMutex::new(conn),
        })
    }

    /// Hold the store lock. Re-entrant for the current thread, so store
    /// methods may still be called while the guard is alive.
    pub fn lock(&self) -> StoreGuard<'_> {
        self.conn.lock()
    }

    /// Run a read-only diagnostic query.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, NdbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| (*c).to_owned()).collect();
        let width = columns.len();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter().map(to_sql)), |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(from_sql))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryResult { columns, rows })
    }

    /// Run a diagnostic statement; returns the number of changed rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, NdbError> {
        let conn = self.lock();
        Ok(conn.execute(sql, rusqlite::params_from_iter(params.iter().map(to_sql)))?)
    }
}

// ── Value conversion ────────────────────────────────────────────────

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Str(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
    }
}

pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Str(f.to_string()),
        ValueRef::Text(t) => Value::Str(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}
