//! CREATE: node and relationship creation.
//!
//! Ids are opaque UUIDv4 strings allocated here; properties are serialized
//! to JSON for the `nodes`/`edges` tables. Null-valued properties are
//! omitted rather than stored. Independent node creations can be batched
//! into multi-VALUES inserts of at most [`MAX_BATCH_ROWS`] rows.

use indexmap::IndexMap;
use uuid::Uuid;

use crate::cypher::ast::{EdgeDirection, EdgeSpec, NodePattern, Pattern};
use crate::model::{EdgeObject, NodeObject, Row, Value};
use crate::storage::SqlStore;
use crate::{Error, Result};

use super::clauses::eval_pattern_props;
use super::Executor;

/// Upper bound on rows per multi-VALUES INSERT.
pub const MAX_BATCH_ROWS: usize = 500;

/// Execute every pattern of a CREATE clause against one row, binding the
/// created entities into it.
pub fn create_patterns_in_row<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &mut Row,
    patterns: &[Pattern],
) -> Result<()> {
    for pattern in patterns {
        match pattern {
            Pattern::Node(np) => {
                let node = create_node(exec, row, np)?;
                if let Some(var) = &np.variable {
                    row.insert(var.clone(), Value::Node(Box::new(node)));
                }
            }
            Pattern::Relationship(rp) => {
                let source_id = resolve_endpoint(exec, row, &rp.source)?;
                let target_id = resolve_endpoint(exec, row, &rp.target)?;
                // A left arrow reverses the stored direction.
                let (source_id, target_id) = match rp.edge.direction {
                    EdgeDirection::Left => (target_id, source_id),
                    _ => (source_id, target_id),
                };
                let edge = create_edge(exec, row, &rp.edge, &source_id, &target_id)?;
                if let Some(var) = &rp.edge.variable {
                    row.insert(var.clone(), Value::Edge(Box::new(edge)));
                }
            }
        }
    }
    Ok(())
}

/// An endpoint is either an existing binding or a node to create inline.
fn resolve_endpoint<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &mut Row,
    np: &NodePattern,
) -> Result<String> {
    if let Some(var) = &np.variable {
        if let Some(bound) = row.get(var) {
            return match bound.entity_id() {
                Some(id) => Ok(id.to_string()),
                None => Err(Error::EvaluationError(format!(
                    "Relationship endpoint `{var}` is {}, not a node",
                    bound.type_name()
                ))),
            };
        }
    }
    let node = create_node(exec, row, np)?;
    let id = node.id.clone();
    if let Some(var) = &np.variable {
        row.insert(var.clone(), Value::Node(Box::new(node)));
    }
    Ok(id)
}

/// Allocate an id, serialize properties and insert one node row.
pub fn create_node<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    np: &NodePattern,
) -> Result<NodeObject> {
    let mut properties = eval_pattern_props(exec, row, &np.properties)?;
    properties.retain(|_, v| !v.is_null());

    let id = Uuid::new_v4().to_string();
    exec.sql(
        "INSERT INTO nodes (id, label, properties) VALUES (?, ?, ?)",
        &[
            Value::String(id.clone()),
            Value::String(labels_json(&np.labels)),
            Value::String(props_json(&properties)),
        ],
    )?;
    Ok(NodeObject::with_properties(id, properties))
}

/// Allocate an id and insert one edge row. The relationship type is
/// mandatory on creation.
pub fn create_edge<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    spec: &EdgeSpec,
    source_id: &str,
    target_id: &str,
) -> Result<EdgeObject> {
    let rel_type = spec.rel_type.clone().ok_or_else(|| {
        Error::EvaluationError("Relationship creation requires a type".into())
    })?;
    let mut properties = eval_pattern_props(exec, row, &spec.properties)?;
    properties.retain(|_, v| !v.is_null());

    let id = Uuid::new_v4().to_string();
    exec.sql(
        "INSERT INTO edges (id, type, source_id, target_id, properties) VALUES (?, ?, ?, ?, ?)",
        &[
            Value::String(id.clone()),
            Value::String(rel_type.clone()),
            Value::String(source_id.to_string()),
            Value::String(target_id.to_string()),
            Value::String(props_json(&properties)),
        ],
    )?;
    Ok(EdgeObject {
        id,
        source: source_id.to_string(),
        target: target_id.to_string(),
        rel_type: Some(rel_type),
        properties,
    })
}

/// Insert pre-built nodes in multi-VALUES chunks.
pub fn batch_insert_nodes<S: SqlStore>(
    exec: &Executor<'_, S>,
    nodes: &[(NodeObject, Vec<String>)],
) -> Result<()> {
    for chunk in nodes.chunks(MAX_BATCH_ROWS) {
        let placeholders: Vec<&str> = chunk.iter().map(|_| "(?, ?, ?)").collect();
        let sql = format!(
            "INSERT INTO nodes (id, label, properties) VALUES {}",
            placeholders.join(", ")
        );
        let mut params = Vec::with_capacity(chunk.len() * 3);
        for (node, labels) in chunk {
            params.push(Value::String(node.id.clone()));
            params.push(Value::String(labels_json(labels)));
            params.push(Value::String(props_json(&node.properties)));
        }
        exec.sql(&sql, &params)?;
    }
    Ok(())
}

pub fn labels_json(labels: &[String]) -> String {
    serde_json::Value::Array(
        labels.iter().map(|l| serde_json::Value::String(l.clone())).collect(),
    )
    .to_string()
}

pub fn props_json(properties: &IndexMap<String, Value>) -> String {
    Value::Map(properties.clone()).to_json().to_string()
}
