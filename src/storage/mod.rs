//! # SQL Store Trait
//!
//! This is THE contract between the query engine and the backing table
//! store. The engine speaks SQL with SQLite-compatible JSON helpers
//! (`json_extract`, `json_each`, `json_set`, `json_patch`, `json_remove`,
//! `json_group_array`); the store owns the persisted rows and the
//! transaction boundary.
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `SqliteStore` | `sqlite` | rusqlite (bundled), file or in-memory |

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::model::{Row, Value};
use crate::Result;

/// Result of one SQL statement.
#[derive(Debug, Clone, Default)]
pub struct SqlResult {
    /// Result rows for SELECTs; empty for mutations.
    pub rows: Vec<Row>,
    /// Rows affected by a mutation; 0 for SELECTs.
    pub changes: u64,
}

/// The storage collaborator.
///
/// Implementations must support positional `?` placeholders and the SQLite
/// JSON1 function family. List/map/temporal parameter values are bound as
/// their JSON text.
pub trait SqlStore {
    /// Run one statement and return its rows (SELECT) or change count.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<SqlResult>;

    /// Begin a transaction. The engine never nests these.
    fn begin(&self) -> Result<()>;

    /// Commit the active transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the active transaction.
    fn rollback(&self) -> Result<()>;

    /// Run `f` atomically: commit on `Ok`, roll back on `Err`.
    fn transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T>
    where
        Self: Sized,
    {
        self.begin()?;
        match f() {
            Ok(v) => {
                self.commit()?;
                Ok(v)
            }
            Err(e) => {
                // Roll back best-effort; the original error wins.
                let _ = self.rollback();
                Err(e)
            }
        }
    }
}

/// Idempotent schema for the two backing tables. `label` is a JSON array of
/// label strings (empty allowed), `properties` a JSON object. Ids are opaque
/// UUID strings allocated by the engine.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id         TEXT PRIMARY KEY,
    label      TEXT NOT NULL DEFAULT '[]',
    properties TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS edges (
    id         TEXT PRIMARY KEY,
    type       TEXT NOT NULL,
    source_id  TEXT NOT NULL,
    target_id  TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
CREATE INDEX IF NOT EXISTS idx_edges_type   ON edges(type);
"#;
