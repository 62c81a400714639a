//! # cypherlite — Embedded Cypher on SQLite
//!
//! An embedded property-graph database. Queries are written in a Cypher
//! subset, compiled into one or more SQL statements against a relational
//! store (`nodes` / `edges` tables with JSON-encoded labels and
//! properties), and answered as ordered rows of [`Value`]s.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cypherlite::{Database, Params, Value};
//!
//! # fn example() -> cypherlite::Result<()> {
//! let db = Database::open_in_memory()?;
//!
//! let mut params = Params::new();
//! params.insert("name".into(), Value::from("Ada"));
//! let result = db.execute("CREATE (n:Person {name: $name}) RETURN n.name AS n", params)?;
//!
//! for row in &result.data {
//!     println!("{:?}", row.get("n"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Semantics notes
//!
//! Cypher's three-valued logic is approximated as two-valued: a comparison
//! involving `null` is `false` in a predicate rather than `null`. This
//! diverges from Neo4j in edge cases and is intentional.

// ============================================================================
// Modules
// ============================================================================

pub mod cypher;
pub mod engine;
pub mod eval;
pub mod model;
pub mod storage;
pub mod translate;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{QueryMeta, QueryResult};
pub use model::{EdgeObject, IsoDuration, NodeObject, PathObject, Row, Value};
pub use storage::{SqlResult, SqlStore, SqliteStore};

/// Query parameter map (`$name` references).
pub type Params = Row;

// ============================================================================
// Top-level Database handle
// ============================================================================

/// The primary entry point. A `Database` wraps a SQL store and provides
/// Cypher execution.
pub struct Database<S: SqlStore = SqliteStore> {
    store: S,
}

impl Database<SqliteStore> {
    /// Open (creating if needed) a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::with_store(SqliteStore::open(path)?))
    }

    /// Open a transient in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_store(SqliteStore::open_in_memory()?))
    }
}

impl<S: SqlStore> Database<S> {
    /// Wrap an already-constructed store.
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    /// Execute a Cypher query with parameters.
    ///
    /// Returns exactly one success or one failure. On failure the active
    /// transaction has been rolled back; no partial mutation is visible.
    pub fn execute(&self, query: &str, params: Params) -> Result<QueryResult> {
        let ast = cypher::parse(query)?;
        engine::Executor::new(&self.store, params).run(&ast)
    }

    /// Access the underlying store (for advanced use).
    pub fn store(&self) -> &S {
        &self.store
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Lexer/parser failure, with source coordinates.
    #[error("Parse error at line {line}, column {column}: {message}")]
    ParseError { message: String, position: usize, line: usize, column: usize },

    /// Semantic failure detected before execution: undefined variables,
    /// MERGE re-binding, conflicting re-declaration.
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    /// RETURN references a variable deleted earlier in the same query.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Non-DETACH DELETE of a connected node, or MERGE on a null property.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Type mismatch, undefined function, unsupported expression shape.
    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    /// Propagated from the storage collaborator.
    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
