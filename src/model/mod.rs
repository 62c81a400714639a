//! # Property Graph Model
//!
//! The value types that cross every boundary: storage ↔ translator ↔
//! engine ↔ caller. This module is pure data — no I/O, no state.

pub mod graph;
pub mod value;

pub use graph::{EdgeObject, NodeObject, PathObject, ID_KEY, START_KEY, END_KEY, TYPE_KEY};
pub use value::{IsoDuration, Value};

use indexmap::IndexMap;

/// A row: an ordered mapping from variable name to value.
pub type Row = IndexMap<String, Value>;
