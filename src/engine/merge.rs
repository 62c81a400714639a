//! MERGE: find-or-create per incoming row.
//!
//! For each row the pattern's properties are resolved, storage is queried
//! for matches (for relationships the endpoints are resolved first, then
//! the edge is matched by endpoint ids and type), and the clause either
//! emits one output row per match — applying ON MATCH SET — or inserts a
//! fresh entity with ON CREATE SET applied to the property map before
//! insertion.
//!
//! A pattern property that evaluates to null through a *variable* makes the
//! whole MERGE a no-op match for that row (explicit nulls and null
//! parameters were already rejected statically).

use std::collections::HashMap;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::cypher::ast::{
    EdgeDirection, MergeClause, NodePattern, Pattern, RelationshipPattern, SetAssignment,
};
use crate::model::{EdgeObject, NodeObject, PathObject, Row, Value};
use crate::storage::SqlStore;
use crate::{Error, Result};

use super::clauses::{apply_set_assignment, eval_pattern_props};
use super::context::PhaseContext;
use super::create::{labels_json, props_json};
use super::Executor;

pub fn apply_merge<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &MergeClause,
) -> Result<PhaseContext> {
    let mut out = Vec::new();
    for row in &ctx.rows {
        out.extend(merge_in_row(exec, row, clause)?);
    }
    let mut next = ctx.clone();
    for row in &out {
        for pattern in &clause.patterns {
            for var in pattern.variables() {
                if let Some(v) = row.get(var) {
                    next.note(var, v);
                }
            }
        }
    }
    Ok(next.with_rows(out))
}

fn merge_in_row<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    clause: &MergeClause,
) -> Result<Vec<Row>> {
    let mut rows = vec![row.clone()];
    for (idx, pattern) in clause.patterns.iter().enumerate() {
        let mut next = Vec::new();
        for r in &rows {
            next.extend(merge_pattern(exec, r, pattern, idx, clause)?);
        }
        rows = next;
    }

    if let Some(path_var) = &clause.path_variable {
        for r in &mut rows {
            let path = build_path(r, &clause.patterns)?;
            r.insert(path_var.clone(), Value::Path(Box::new(path)));
        }
    }
    // Hidden per-segment bindings only exist to assemble paths.
    for r in &mut rows {
        r.retain(|k, _| !k.starts_with("__merge_"));
    }
    Ok(rows)
}

fn merge_pattern<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    pattern: &Pattern,
    idx: usize,
    clause: &MergeClause,
) -> Result<Vec<Row>> {
    match pattern {
        Pattern::Node(np) => merge_node(exec, row, np, idx, clause),
        Pattern::Relationship(rp) => merge_relationship(exec, row, rp, idx, clause),
    }
}

/// Variable a pattern part binds under: its own, or a hidden per-segment
/// name so anonymous parts still participate in path assembly.
fn part_key(explicit: &Option<String>, idx: usize, part: &str) -> String {
    match explicit {
        Some(v) => v.clone(),
        None => format!("__merge_{part}_{idx}"),
    }
}

// ============================================================================
// Node MERGE
// ============================================================================

fn merge_node<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    np: &NodePattern,
    idx: usize,
    clause: &MergeClause,
) -> Result<Vec<Row>> {
    let key = part_key(&np.variable, idx, "node");
    let props = eval_pattern_props(exec, row, &np.properties)?;
    if props.values().any(Value::is_null) {
        // Null through a variable: no-op match.
        let mut r = row.clone();
        r.insert(key, Value::Null);
        return Ok(vec![r]);
    }

    let found = exec.find_nodes(&np.labels, &props)?;
    if !found.is_empty() {
        let mut out = Vec::new();
        for node in found {
            let mut r = row.clone();
            r.insert(key.clone(), Value::Node(Box::new(node)));
            for item in &clause.on_match {
                apply_set_assignment(exec, &mut r, item)?;
            }
            out.push(r);
        }
        return Ok(out);
    }

    // Not found: build the node, apply ON CREATE SET to it pre-insert.
    let mut r = row.clone();
    let node = NodeObject::with_properties(Uuid::new_v4().to_string(), props);
    r.insert(key.clone(), Value::Node(Box::new(node.clone())));
    let mut extra_labels: HashMap<String, Vec<String>> = HashMap::new();
    for item in &clause.on_create {
        apply_assignment_in_memory(exec, &mut r, item, &mut extra_labels)?;
    }

    let final_node = match r.get(&key) {
        Some(Value::Node(n)) => (**n).clone(),
        _ => node,
    };
    let mut labels = np.labels.clone();
    for l in extra_labels.remove(&key).unwrap_or_default() {
        if !labels.contains(&l) {
            labels.push(l);
        }
    }
    insert_node(exec, &final_node, &labels)?;

    // Assignments that targeted other (pre-existing) variables go through
    // the storage-backed path.
    for (target_var, add) in extra_labels {
        if let Some(Value::Node(n)) = r.get(&target_var) {
            exec.add_labels(&n.id, &add)?;
        }
    }
    Ok(vec![r])
}

// ============================================================================
// Relationship MERGE
// ============================================================================

fn merge_relationship<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    rp: &RelationshipPattern,
    idx: usize,
    clause: &MergeClause,
) -> Result<Vec<Row>> {
    let edge_props = eval_pattern_props(exec, row, &rp.edge.properties)?;
    if edge_props.values().any(Value::is_null) {
        let mut r = row.clone();
        if let Some(var) = &rp.edge.variable {
            r.insert(var.clone(), Value::Null);
        }
        return Ok(vec![r]);
    }

    // Resolve both endpoints first; the edge is then matched by endpoint
    // ids and type. A null bound endpoint short-circuits to a no-op.
    let Some((src_candidates, src_created)) = endpoint_candidates(exec, row, &rp.source)? else {
        return Ok(vec![row.clone()]);
    };
    let Some((tgt_candidates, tgt_created)) = endpoint_candidates(exec, row, &rp.target)? else {
        return Ok(vec![row.clone()]);
    };

    let rel_type = rp.edge.rel_type.clone().ok_or_else(|| {
        Error::EvaluationError("MERGE of a relationship requires a type".into())
    })?;

    let mut out = Vec::new();
    for src in &src_candidates {
        for tgt in &tgt_candidates {
            // Stored orientation per the pattern arrow.
            let (stored_src, stored_tgt) = match rp.edge.direction {
                EdgeDirection::Left => (tgt, src),
                _ => (src, tgt),
            };
            let undirected = rp.edge.direction == EdgeDirection::Undirected;
            let found = exec.find_edges(
                &rel_type,
                &stored_src.id,
                &stored_tgt.id,
                &edge_props,
                undirected,
            )?;

            if !found.is_empty() {
                for edge in found {
                    let mut r = row.clone();
                    bind_pattern(&mut r, rp, idx, src, tgt, &edge);
                    for item in &clause.on_match {
                        apply_set_assignment(exec, &mut r, item)?;
                    }
                    out.push(r);
                }
            } else {
                let edge = EdgeObject {
                    id: Uuid::new_v4().to_string(),
                    source: stored_src.id.clone(),
                    target: stored_tgt.id.clone(),
                    rel_type: Some(rel_type.clone()),
                    properties: edge_props.clone(),
                };
                let mut r = row.clone();
                bind_pattern(&mut r, rp, idx, src, tgt, &edge);

                let mut extra_labels: HashMap<String, Vec<String>> = HashMap::new();
                for item in &clause.on_create {
                    apply_assignment_in_memory(exec, &mut r, item, &mut extra_labels)?;
                }

                // Freshly created endpoints carry the in-memory updates into
                // their insert; the edge likewise.
                let src_key = part_key(&rp.source.variable, idx, "src");
                let tgt_key = part_key(&rp.target.variable, idx, "tgt");
                persist_endpoint(exec, &r, &rp.source, &src_key, src, src_created, &mut extra_labels)?;
                persist_endpoint(exec, &r, &rp.target, &tgt_key, tgt, tgt_created, &mut extra_labels)?;
                let edge_key = part_key(&rp.edge.variable, idx, "edge");
                let final_edge = match r.get(&edge_key) {
                    Some(Value::Edge(e)) => (**e).clone(),
                    _ => edge,
                };
                insert_edge(exec, &final_edge)?;

                for (target_var, add) in extra_labels {
                    if let Some(Value::Node(n)) = r.get(&target_var) {
                        exec.add_labels(&n.id, &add)?;
                    }
                }
                out.push(r);
            }
        }
    }
    Ok(out)
}

/// Candidate nodes for one endpoint: the bound value, all matches, or one
/// node to create. `None` means a null binding short-circuited the merge.
/// The bool reports "will be created".
fn endpoint_candidates<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    np: &NodePattern,
) -> Result<Option<(Vec<NodeObject>, bool)>> {
    if let Some(var) = &np.variable {
        match row.get(var) {
            Some(Value::Node(n)) => return Ok(Some((vec![(**n).clone()], false))),
            Some(Value::Null) => return Ok(None),
            Some(other) => {
                return Err(Error::EvaluationError(format!(
                    "MERGE endpoint `{var}` is {}, not a node",
                    other.type_name()
                )));
            }
            None => {}
        }
    }
    let props = eval_pattern_props(exec, row, &np.properties)?;
    if props.values().any(Value::is_null) {
        return Ok(None);
    }
    let found = exec.find_nodes(&np.labels, &props)?;
    if found.is_empty() {
        let node = NodeObject::with_properties(Uuid::new_v4().to_string(), props);
        Ok(Some((vec![node], true)))
    } else {
        Ok(Some((found, false)))
    }
}

fn persist_endpoint<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    np: &NodePattern,
    key: &str,
    candidate: &NodeObject,
    created: bool,
    extra_labels: &mut HashMap<String, Vec<String>>,
) -> Result<()> {
    if !created {
        return Ok(());
    }
    let mut labels = np.labels.clone();
    let node = match row.get(key) {
        Some(Value::Node(n)) => (**n).clone(),
        _ => candidate.clone(),
    };
    for l in extra_labels.remove(key).unwrap_or_default() {
        if !labels.contains(&l) {
            labels.push(l);
        }
    }
    insert_node(exec, &node, &labels)
}

fn bind_pattern(
    row: &mut Row,
    rp: &RelationshipPattern,
    idx: usize,
    src: &NodeObject,
    tgt: &NodeObject,
    edge: &EdgeObject,
) {
    row.insert(
        part_key(&rp.source.variable, idx, "src"),
        Value::Node(Box::new(src.clone())),
    );
    row.insert(
        part_key(&rp.target.variable, idx, "tgt"),
        Value::Node(Box::new(tgt.clone())),
    );
    row.insert(
        part_key(&rp.edge.variable, idx, "edge"),
        Value::Edge(Box::new(edge.clone())),
    );
}

// ============================================================================
// In-memory ON CREATE application
// ============================================================================

/// Apply a SET assignment to the objects bound in the row without touching
/// storage. Label additions are collected per variable for the caller to
/// fold into the insert (new entities) or apply via storage (existing
/// ones).
fn apply_assignment_in_memory<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &mut Row,
    item: &SetAssignment,
    extra_labels: &mut HashMap<String, Vec<String>>,
) -> Result<()> {
    if !item.labels.is_empty() {
        extra_labels
            .entry(item.variable.clone())
            .or_default()
            .extend(item.labels.iter().cloned());
        return Ok(());
    }

    let value = match &item.value {
        Some(expr) => exec.eval(expr, row)?,
        None => Value::Null,
    };
    let Some(bound) = row.get(&item.variable).cloned() else {
        return Ok(());
    };

    let mutate = |props: &mut IndexMap<String, Value>| -> Result<()> {
        if let Some(key) = &item.property {
            if value.is_null() {
                props.shift_remove(key);
            } else {
                props.insert(key.clone(), value.clone());
            }
        } else if item.replace_props {
            *props = require_map(&value)?;
        } else if item.merge_props {
            for (k, v) in require_map(&value)? {
                if v.is_null() {
                    props.shift_remove(&k);
                } else {
                    props.insert(k, v);
                }
            }
        }
        Ok(())
    };

    match bound {
        Value::Node(mut n) => {
            mutate(&mut n.properties)?;
            row.insert(item.variable.clone(), Value::Node(n));
        }
        Value::Edge(mut e) => {
            mutate(&mut e.properties)?;
            row.insert(item.variable.clone(), Value::Edge(e));
        }
        Value::Null => {}
        other => {
            return Err(Error::EvaluationError(format!(
                "SET target `{}` is {}, not an entity",
                item.variable,
                other.type_name()
            )));
        }
    }
    Ok(())
}

fn require_map(value: &Value) -> Result<IndexMap<String, Value>> {
    match value {
        Value::Map(m) => Ok(m.clone()),
        Value::Node(n) => Ok(n.properties.clone()),
        Value::Edge(e) => Ok(e.properties.clone()),
        other => Err(Error::EvaluationError(format!(
            "Expected a map for property assignment, got {}",
            other.type_name()
        ))),
    }
}

// ============================================================================
// Inserts and paths
// ============================================================================

fn insert_node<S: SqlStore>(exec: &Executor<'_, S>, node: &NodeObject, labels: &[String]) -> Result<()> {
    exec.sql(
        "INSERT INTO nodes (id, label, properties) VALUES (?, ?, ?)",
        &[
            Value::String(node.id.clone()),
            Value::String(labels_json(labels)),
            Value::String(props_json(&node.properties)),
        ],
    )?;
    Ok(())
}

fn insert_edge<S: SqlStore>(exec: &Executor<'_, S>, edge: &EdgeObject) -> Result<()> {
    exec.sql(
        "INSERT INTO edges (id, type, source_id, target_id, properties) VALUES (?, ?, ?, ?, ?)",
        &[
            Value::String(edge.id.clone()),
            Value::String(edge.rel_type.clone().unwrap_or_default()),
            Value::String(edge.source.clone()),
            Value::String(edge.target.clone()),
            Value::String(props_json(&edge.properties)),
        ],
    )?;
    Ok(())
}

/// Assemble the merged chain into a path value: source, edge, target,
/// edge, target, ...
fn build_path(row: &Row, patterns: &[Pattern]) -> Result<PathObject> {
    let mut path = PathObject::default();
    for (idx, pattern) in patterns.iter().enumerate() {
        match pattern {
            Pattern::Node(np) => {
                let key = part_key(&np.variable, idx, "node");
                if let Some(Value::Node(n)) = row.get(&key) {
                    if path.nodes.is_empty() {
                        path.nodes.push((**n).clone());
                    }
                }
            }
            Pattern::Relationship(rp) => {
                let node_at = |key: String| -> Option<NodeObject> {
                    match row.get(&key) {
                        Some(Value::Node(n)) => Some((**n).clone()),
                        _ => None,
                    }
                };
                let edge = match row.get(&part_key(&rp.edge.variable, idx, "edge")) {
                    Some(Value::Edge(e)) => Some((**e).clone()),
                    _ => None,
                };
                let (Some(src), Some(tgt), Some(edge)) = (
                    node_at(part_key(&rp.source.variable, idx, "src")),
                    node_at(part_key(&rp.target.variable, idx, "tgt")),
                    edge,
                ) else {
                    continue;
                };
                if path.nodes.is_empty() {
                    path.nodes.push(src);
                }
                path.append(edge, tgt);
            }
        }
    }
    Ok(path)
}
