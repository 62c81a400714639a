//! Row sets flowing between clauses.

use std::collections::{HashMap, HashSet};

use crate::model::{Row, Value};

/// The evolving row set between two clauses within one execution phase.
///
/// The row list is the authoritative binding. The side indexes map a
/// variable to the id/value it was last bound to anywhere in the phase —
/// convenience for strategies that only need one representative binding.
#[derive(Debug, Clone, Default)]
pub struct PhaseContext {
    pub rows: Vec<Row>,
    pub node_ids: HashMap<String, String>,
    pub edge_ids: HashMap<String, String>,
    pub values: HashMap<String, Value>,
    /// Variables consumed by DELETE earlier in the query; referencing one in
    /// RETURN is an `EntityNotFound`.
    pub deleted: HashSet<String>,
}

impl PhaseContext {
    /// A fresh context holds exactly one empty row, so a row-producing
    /// clause can execute its body against the unit row.
    pub fn unit() -> Self {
        Self { rows: vec![Row::new()], ..Default::default() }
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows, ..Default::default() }
    }

    /// Bind a value into a row, maintaining the side indexes.
    pub fn bind(&mut self, row_index: usize, variable: &str, value: Value) {
        self.note(variable, &value);
        if let Some(row) = self.rows.get_mut(row_index) {
            row.insert(variable.to_string(), value);
        }
    }

    /// Record a binding in the side indexes only.
    pub fn note(&mut self, variable: &str, value: &Value) {
        match value {
            Value::Node(n) => {
                self.node_ids.insert(variable.to_string(), n.id.clone());
            }
            Value::Edge(e) => {
                self.edge_ids.insert(variable.to_string(), e.id.clone());
            }
            other => {
                self.values.insert(variable.to_string(), other.clone());
            }
        }
    }

    /// Replace the row list, keeping side indexes and deletion tracking.
    pub fn with_rows(&self, rows: Vec<Row>) -> Self {
        Self {
            rows,
            node_ids: self.node_ids.clone(),
            edge_ids: self.edge_ids.clone(),
            values: self.values.clone(),
            deleted: self.deleted.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeObject;

    #[test]
    fn unit_context_has_one_empty_row() {
        let ctx = PhaseContext::unit();
        assert_eq!(ctx.rows.len(), 1);
        assert!(ctx.rows[0].is_empty());
    }

    #[test]
    fn bind_maintains_side_indexes() {
        let mut ctx = PhaseContext::unit();
        ctx.bind(0, "n", Value::Node(Box::new(NodeObject::new("n-1"))));
        ctx.bind(0, "x", Value::Int(7));
        assert_eq!(ctx.node_ids.get("n").map(String::as_str), Some("n-1"));
        assert_eq!(ctx.values.get("x"), Some(&Value::Int(7)));
    }
}
