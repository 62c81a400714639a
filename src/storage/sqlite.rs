//! SQLite implementation of the [`SqlStore`] collaborator.
//!
//! A single connection behind a mutex. The engine is single-threaded per
//! query, so contention only arises when the caller shares one `Database`
//! across threads; each statement locks independently and the transaction
//! statements (`BEGIN`/`COMMIT`/`ROLLBACK`) are issued by the engine, which
//! owns the store for the duration of one query.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::{SqlResult, SqlStore, SCHEMA};
use crate::model::{Row, Value};
use crate::{Error, Result};

/// rusqlite-backed store, file or in-memory.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// Open a transient in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl SqlStore for SqliteStore {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<SqlResult> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage_err)?;
        let bound: Vec<rusqlite::types::Value> = params.iter().map(bind_value).collect();

        if stmt.column_count() == 0 {
            let changes = stmt
                .execute(rusqlite::params_from_iter(bound))
                .map_err(storage_err)?;
            return Ok(SqlResult { rows: Vec::new(), changes: changes as u64 });
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut sql_rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(storage_err)?;

        let mut rows = Vec::new();
        while let Some(sql_row) = sql_rows.next().map_err(storage_err)? {
            let mut row = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = match sql_row.get_ref(idx).map_err(storage_err)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(i) => Value::Int(i),
                    rusqlite::types::ValueRef::Real(f) => Value::Float(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::String(String::from_utf8_lossy(t).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(_) => Value::Null,
                };
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }
        Ok(SqlResult { rows, changes: 0 })
    }

    fn begin(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(storage_err)
    }

    fn commit(&self) -> Result<()> {
        self.conn.lock().execute_batch("COMMIT").map_err(storage_err)
    }

    fn rollback(&self) -> Result<()> {
        self.conn.lock().execute_batch("ROLLBACK").map_err(storage_err)
    }
}

/// Scalars bind natively; containers and temporal values bind as JSON text.
fn bind_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => match other.temporal_string() {
            Some(iso) => rusqlite::types::Value::Text(iso),
            None => rusqlite::types::Value::Text(other.to_json().to_string()),
        },
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::StorageError(e.to_string())
}
