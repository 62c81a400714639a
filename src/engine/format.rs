//! Result formatting.
//!
//! Three jobs: deep-parse JSON-encoded columns coming back from SQL into
//! values (re-assembling entities from their reserved keys), apply
//! row-set-level DISTINCT / slicing, and encode the final rows for the
//! caller boundary (entities become plain property maps, paths become
//! alternating lists, temporal values become ISO 8601 strings).

use crate::model::{Row, Value};

// ============================================================================
// Deep parsing
// ============================================================================

/// Recursively parse any string that is valid JSON. Objects carrying the
/// reserved id keys come back as node/edge values.
pub fn deep_parse_value(value: Value) -> Value {
    match value {
        Value::String(s) => match serde_json::from_str::<serde_json::Value>(&s) {
            Ok(json) if !json.is_string() => Value::from_json(&json),
            _ => Value::String(s),
        },
        Value::List(items) => Value::List(items.into_iter().map(deep_parse_value).collect()),
        Value::Map(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, deep_parse_value(v))).collect())
        }
        other => other,
    }
}

/// Deep-parse every column of a SQL result row.
pub fn deep_parse_row(row: Row) -> Row {
    row.into_iter().map(|(k, v)| (k, deep_parse_value(v))).collect()
}

// ============================================================================
// DISTINCT / slicing
// ============================================================================

/// Key a value for DISTINCT: entities by `_nf_id`, everything else by its
/// JSON text.
fn distinct_key(value: &Value) -> String {
    match value.entity_id() {
        Some(id) => id.to_string(),
        None => value.to_json().to_string(),
    }
}

/// Drop duplicate rows, preserving first-seen order.
pub fn distinct_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let key: Vec<String> = row.values().map(distinct_key).collect();
        let key = key.join("\u{1f}");
        if seen.insert(key) {
            out.push(row);
        }
    }
    out
}

/// SKIP then LIMIT, after any ordering.
pub fn apply_slice(rows: Vec<Row>, skip: Option<i64>, limit: Option<i64>) -> Vec<Row> {
    let skip = skip.unwrap_or(0).max(0) as usize;
    let iter = rows.into_iter().skip(skip);
    match limit {
        Some(l) => iter.take(l.max(0) as usize).collect(),
        None => iter.collect(),
    }
}

// ============================================================================
// Boundary encoding
// ============================================================================

/// Project only the declared columns (dropping `_id_*` style extras) and
/// encode each value for the caller.
pub fn finalize_rows(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|col| {
                    let value = row.get(col).cloned().unwrap_or(Value::Null);
                    (col.clone(), boundary_value(value))
                })
                .collect()
        })
        .collect()
}

/// `RETURN *`: every user binding in row order, internal `__`-named
/// helpers dropped.
pub fn finalize_star_rows(rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(k, _)| !k.starts_with("__"))
                .map(|(k, v)| (k, boundary_value(v)))
                .collect()
        })
        .collect()
}

/// Encode one value for the caller boundary.
pub fn boundary_value(value: Value) -> Value {
    match value {
        Value::Node(n) => {
            Value::Map(n.properties.into_iter().map(|(k, v)| (k, boundary_value(v))).collect())
        }
        Value::Edge(e) => {
            Value::Map(e.properties.into_iter().map(|(k, v)| (k, boundary_value(v))).collect())
        }
        Value::Path(p) => {
            let mut out = Vec::with_capacity(p.nodes.len() + p.edges.len());
            for (i, node) in p.nodes.into_iter().enumerate() {
                out.push(boundary_value(Value::Node(Box::new(node))));
                if let Some(edge) = p.edges.get(i) {
                    out.push(boundary_value(Value::Edge(Box::new(edge.clone()))));
                }
            }
            Value::List(out)
        }
        Value::List(items) => Value::List(items.into_iter().map(boundary_value).collect()),
        Value::Map(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, boundary_value(v))).collect())
        }
        temporal @ (Value::Date(_)
        | Value::Time { .. }
        | Value::LocalTime(_)
        | Value::DateTime { .. }
        | Value::LocalDateTime(_)
        | Value::Duration(_)) => {
            Value::String(temporal.temporal_string().unwrap_or_default())
        }
        scalar => scalar,
    }
}

/// Single-element label arrays normalize to the bare string (labels come
/// out of storage as JSON arrays).
pub fn normalize_labels(value: Value) -> Value {
    match value {
        Value::List(items) if items.len() == 1 && matches!(items[0], Value::String(_)) => {
            items.into_iter().next().unwrap_or(Value::Null)
        }
        other => other,
    }
}
