//! Per-clause row-set operators.
//!
//! Each operator consumes a [`PhaseContext`] and produces the next one.
//! MATCH with entirely new variables is delegated to the translator for one
//! batched SQL lookup; MATCH constrained by bound variables runs per
//! incoming row with ids substituted into the SQL. Everything else is
//! evaluated in memory over the row set.

use indexmap::IndexMap;

use crate::cypher::ast::{
    Clause, CreateClause, DeleteClause, EdgeDirection, Expression, MatchClause, NodePattern,
    ProjectionClause, Query, RelationshipPattern, RemoveClause, SetAssignment, SetClause,
    UnwindClause,
};
use crate::model::{EdgeObject, NodeObject, Row, Value};
use crate::storage::SqlStore;
use crate::translate;
use crate::{Error, Result};

use super::context::PhaseContext;
use super::format;
use super::{create, merge, Executor};

/// Execute one clause against the context.
pub fn apply_clause<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &Clause,
) -> Result<PhaseContext> {
    match clause {
        Clause::Match(m) => apply_match(exec, ctx, m, false),
        Clause::OptionalMatch(m) => apply_match(exec, ctx, m, true),
        Clause::Create(c) => apply_create(exec, ctx, c),
        Clause::Merge(m) => merge::apply_merge(exec, ctx, m),
        Clause::Set(s) => apply_set(exec, ctx, s),
        Clause::Remove(r) => apply_remove(exec, ctx, r),
        Clause::Delete(d) => apply_delete(exec, ctx, d),
        Clause::With(w) => apply_projection(exec, ctx, w, false),
        Clause::Unwind(u) => apply_unwind(exec, ctx, u),
        Clause::Return(r) => apply_projection(exec, ctx, r, true),
        Clause::Call(c) => Err(Error::EvaluationError(format!(
            "CALL {} is not supported",
            c.procedure
        ))),
        Clause::Union(_) => Err(Error::EvaluationError("UNION is not supported".into())),
    }
}

// ============================================================================
// MATCH
// ============================================================================

fn apply_match<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &MatchClause,
    optional: bool,
) -> Result<PhaseContext> {
    let mut pattern_vars: Vec<String> = Vec::new();
    for pattern in &clause.patterns {
        for var in pattern.variables() {
            // Chain segments repeat the shared node variable.
            if !pattern_vars.iter().any(|v| v == var) {
                pattern_vars.push(var.to_string());
            }
        }
    }

    let bound_in_ctx = |var: &str| ctx.rows.iter().any(|r| r.contains_key(var));
    let all_new = pattern_vars.iter().all(|v| !bound_in_ctx(v));

    let where_only_pattern_vars = match &clause.where_clause {
        Some(cond) => {
            let mut vars = Vec::new();
            cond.collect_variables(&mut vars);
            vars.iter().all(|v| pattern_vars.contains(v))
        }
        None => true,
    };

    // Fast path: nothing in the pattern is constrained by the context —
    // one batched SQL lookup, then a Cartesian join with the incoming rows.
    if all_new && where_only_pattern_vars && !has_var_length(clause) {
        let synthetic = Query {
            clauses: vec![
                Clause::Match(clause.clone()),
                Clause::Return(return_of_variables(&pattern_vars)),
            ],
        };
        if let Some(translation) = translate::translate(&synthetic, exec.params())? {
            let mut matches: Vec<Row> = Vec::new();
            for stmt in &translation.statements {
                let result = exec.sql(&stmt.sql, &stmt.params)?;
                matches.extend(result.rows.into_iter().map(format::deep_parse_row));
            }
            return Ok(join_matches(ctx, matches, &pattern_vars, optional));
        }
    }

    // General path: per incoming row, with bound ids as constraints.
    let mut out = Vec::new();
    let mut next = ctx.clone();
    for row in &ctx.rows {
        if optional && pattern_references_null_binding(row, clause) {
            out.push(null_extended(row, &pattern_vars));
            continue;
        }
        let mut expanded = match_patterns_in_row(exec, row, &clause.patterns)?;
        if let Some(cond) = &clause.where_clause {
            let mut kept = Vec::new();
            for r in expanded {
                if exec.test(cond, &r)? {
                    kept.push(r);
                }
            }
            expanded = kept;
        }
        if expanded.is_empty() {
            if optional {
                out.push(null_extended(row, &pattern_vars));
            }
        } else {
            out.extend(expanded);
        }
    }
    for row in &out {
        for var in &pattern_vars {
            if let Some(v) = row.get(var) {
                next.note(var, v);
            }
        }
    }
    Ok(next.with_rows(out))
}

fn has_var_length(clause: &MatchClause) -> bool {
    clause.patterns.iter().any(|p| match p {
        crate::cypher::ast::Pattern::Relationship(rp) => rp.edge.var_length,
        _ => false,
    })
}

fn return_of_variables(vars: &[String]) -> ProjectionClause {
    ProjectionClause {
        distinct: false,
        star: false,
        items: vars
            .iter()
            .map(|v| crate::cypher::ast::ProjectionItem {
                expr: Expression::Variable(v.clone()),
                alias: None,
            })
            .collect(),
        where_clause: None,
        order_by: Vec::new(),
        skip: None,
        limit: None,
    }
}

fn join_matches(
    ctx: PhaseContext,
    matches: Vec<Row>,
    pattern_vars: &[String],
    optional: bool,
) -> PhaseContext {
    let mut out = Vec::new();
    for row in &ctx.rows {
        if matches.is_empty() {
            if optional {
                out.push(null_extended(row, pattern_vars));
            }
            continue;
        }
        for m in &matches {
            let mut joined = row.clone();
            for (k, v) in m {
                joined.insert(k.clone(), v.clone());
            }
            out.push(joined);
        }
    }
    let mut next = ctx.clone();
    for m in &matches {
        for (k, v) in m {
            next.note(k, v);
        }
    }
    next.with_rows(out)
}

fn null_extended(row: &Row, vars: &[String]) -> Row {
    let mut out = row.clone();
    for var in vars {
        out.entry(var.clone()).or_insert(Value::Null);
    }
    out
}

/// A bound context variable referenced by the pattern is null — OPTIONAL
/// MATCH short-circuits to null outputs.
fn pattern_references_null_binding(row: &Row, clause: &MatchClause) -> bool {
    clause.patterns.iter().any(|p| {
        p.variables()
            .iter()
            .any(|v| matches!(row.get(*v), Some(Value::Null)))
    })
}

/// Expand all patterns of one MATCH against a single incoming row.
pub fn match_patterns_in_row<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    patterns: &[crate::cypher::ast::Pattern],
) -> Result<Vec<Row>> {
    let mut rows = vec![row.clone()];
    for pattern in patterns {
        let mut next = Vec::new();
        for r in &rows {
            match pattern {
                crate::cypher::ast::Pattern::Node(np) => {
                    next.extend(match_node_pattern(exec, r, np)?);
                }
                crate::cypher::ast::Pattern::Relationship(rp) => {
                    next.extend(match_relationship_pattern(exec, r, rp)?);
                }
            }
        }
        rows = next;
        if rows.is_empty() {
            break;
        }
    }
    Ok(rows)
}

fn match_node_pattern<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    np: &NodePattern,
) -> Result<Vec<Row>> {
    let props = eval_pattern_props(exec, row, &np.properties)?;

    if let Some(var) = &np.variable {
        if let Some(bound) = row.get(var) {
            // Re-reference: verify the bound node against the constraints.
            return match bound {
                Value::Node(node) => {
                    if node_satisfies(exec, node, &np.labels, &props)? {
                        Ok(vec![row.clone()])
                    } else {
                        Ok(Vec::new())
                    }
                }
                _ => Ok(Vec::new()),
            };
        }
    }

    let found = exec.find_nodes(&np.labels, &props)?;
    let mut out = Vec::new();
    for node in found {
        let mut r = row.clone();
        if let Some(var) = &np.variable {
            r.insert(var.clone(), Value::Node(Box::new(node)));
        }
        out.push(r);
    }
    Ok(out)
}

fn match_relationship_pattern<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    rp: &RelationshipPattern,
) -> Result<Vec<Row>> {
    // Bound relationship-list path: -[rs*]-> with `rs` bound to an edge
    // list. Reconstruct the endpoints by chaining the list and verify
    // continuity.
    if rp.edge.var_length {
        if let Some(var) = &rp.edge.variable {
            if let Some(bound) = row.get(var) {
                return follow_edge_list(exec, row, rp, bound.clone());
            }
        }
        return Err(Error::EvaluationError(
            "Variable-length patterns are only supported with a bound relationship list".into(),
        ));
    }

    let edge_props = eval_pattern_props(exec, row, &rp.edge.properties)?;
    let source_props = eval_pattern_props(exec, row, &rp.source.properties)?;
    let target_props = eval_pattern_props(exec, row, &rp.target.properties)?;

    let bound_id = |np: &NodePattern| -> Option<String> {
        np.variable
            .as_ref()
            .and_then(|v| row.get(v))
            .and_then(|v| v.entity_id().map(str::to_string))
    };
    let src_id = bound_id(&rp.source);
    let tgt_id = bound_id(&rp.target);

    // Constrain the edge scan by everything we already know.
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    if let Some(t) = &rp.edge.rel_type {
        conditions.push("type = ?".to_string());
        params.push(Value::String(t.clone()));
    }
    for (key, value) in &edge_props {
        super::push_property_condition(&mut conditions, &mut params, key, value);
    }
    let endpoint_cond = match (&src_id, &tgt_id, rp.edge.direction) {
        (Some(s), Some(t), EdgeDirection::Right) => {
            params.push(Value::String(s.clone()));
            params.push(Value::String(t.clone()));
            Some("source_id = ? AND target_id = ?".to_string())
        }
        (Some(s), Some(t), EdgeDirection::Left) => {
            params.push(Value::String(t.clone()));
            params.push(Value::String(s.clone()));
            Some("source_id = ? AND target_id = ?".to_string())
        }
        (Some(s), Some(t), EdgeDirection::Undirected) => {
            params.push(Value::String(s.clone()));
            params.push(Value::String(t.clone()));
            params.push(Value::String(t.clone()));
            params.push(Value::String(s.clone()));
            Some(
                "((source_id = ? AND target_id = ?) OR (source_id = ? AND target_id = ?))"
                    .to_string(),
            )
        }
        (Some(s), None, EdgeDirection::Right) | (None, Some(s), EdgeDirection::Left) => {
            params.push(Value::String(s.clone()));
            Some("source_id = ?".to_string())
        }
        (Some(s), None, EdgeDirection::Left) | (None, Some(s), EdgeDirection::Right) => {
            params.push(Value::String(s.clone()));
            Some("target_id = ?".to_string())
        }
        (Some(s), None, EdgeDirection::Undirected) | (None, Some(s), EdgeDirection::Undirected) => {
            params.push(Value::String(s.clone()));
            params.push(Value::String(s.clone()));
            Some("(source_id = ? OR target_id = ?)".to_string())
        }
        (None, None, _) => None,
    };
    if let Some(c) = endpoint_cond {
        conditions.push(c);
    }

    let sql = if conditions.is_empty() {
        "SELECT id, type, source_id, target_id, properties FROM edges".to_string()
    } else {
        format!(
            "SELECT id, type, source_id, target_id, properties FROM edges WHERE {}",
            conditions.join(" AND ")
        )
    };
    let result = exec.sql(&sql, &params)?;

    let mut out = Vec::new();
    for edge_row in result.rows {
        let edge = decode_edge_row(&edge_row)?;

        // Orientations to try: a directed pattern has one; an undirected
        // pattern matches the edge both ways.
        let orientations: Vec<(String, String)> = match rp.edge.direction {
            EdgeDirection::Right => vec![(edge.source.clone(), edge.target.clone())],
            EdgeDirection::Left => vec![(edge.target.clone(), edge.source.clone())],
            EdgeDirection::Undirected => {
                if edge.source == edge.target {
                    vec![(edge.source.clone(), edge.target.clone())]
                } else {
                    vec![
                        (edge.source.clone(), edge.target.clone()),
                        (edge.target.clone(), edge.source.clone()),
                    ]
                }
            }
        };

        for (pattern_src, pattern_tgt) in orientations {
            if let Some(id) = &src_id {
                if *id != pattern_src {
                    continue;
                }
            }
            if let Some(id) = &tgt_id {
                if *id != pattern_tgt {
                    continue;
                }
            }
            let Some(src_node) =
                resolve_endpoint(exec, row, &rp.source, &pattern_src, &source_props)?
            else {
                continue;
            };
            let Some(tgt_node) =
                resolve_endpoint(exec, row, &rp.target, &pattern_tgt, &target_props)?
            else {
                continue;
            };

            let mut r = row.clone();
            if let Some(v) = &rp.source.variable {
                r.insert(v.clone(), Value::Node(Box::new(src_node)));
            }
            if let Some(v) = &rp.target.variable {
                r.insert(v.clone(), Value::Node(Box::new(tgt_node)));
            }
            if let Some(v) = &rp.edge.variable {
                r.insert(v.clone(), Value::Edge(Box::new(edge.clone())));
            }
            out.push(r);
        }
    }
    Ok(out)
}

/// Fetch (or re-verify) one endpoint of a matched edge.
fn resolve_endpoint<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    np: &NodePattern,
    node_id: &str,
    props: &IndexMap<String, Value>,
) -> Result<Option<NodeObject>> {
    if let Some(var) = &np.variable {
        if let Some(Value::Node(bound)) = row.get(var) {
            if bound.id != node_id {
                return Ok(None);
            }
            return Ok(Some((**bound).clone()));
        }
    }
    let Some(node) = exec.node_by_id(node_id)? else {
        return Ok(None);
    };
    if node_satisfies(exec, &node, &np.labels, props)? {
        Ok(Some(node))
    } else {
        Ok(None)
    }
}

fn node_satisfies<S: SqlStore>(
    exec: &Executor<'_, S>,
    node: &NodeObject,
    labels: &[String],
    props: &IndexMap<String, Value>,
) -> Result<bool> {
    if !labels.is_empty() {
        let have = exec.node_labels(&node.id)?;
        if !labels.iter().all(|l| have.contains(l)) {
            return Ok(false);
        }
    }
    for (key, value) in props {
        if node.properties.get(key) != Some(value) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Chain a bound edge list, verifying that each edge starts where the
/// previous one ended, and bind the pattern endpoints to the chain ends.
fn follow_edge_list<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    rp: &RelationshipPattern,
    bound: Value,
) -> Result<Vec<Row>> {
    let edges: Vec<EdgeObject> = match bound {
        Value::List(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Edge(e) => Some(*e),
                _ => None,
            })
            .collect(),
        Value::Edge(e) => vec![*e],
        Value::Null => return Ok(Vec::new()),
        _ => return Ok(Vec::new()),
    };
    if edges.is_empty() {
        return Ok(Vec::new());
    }

    for pair in edges.windows(2) {
        if pair[0].target != pair[1].source {
            return Ok(Vec::new());
        }
    }
    let (start_id, end_id) = match rp.edge.direction {
        EdgeDirection::Left => (
            edges.last().map(|e| e.target.clone()).unwrap_or_default(),
            edges.first().map(|e| e.source.clone()).unwrap_or_default(),
        ),
        _ => (
            edges.first().map(|e| e.source.clone()).unwrap_or_default(),
            edges.last().map(|e| e.target.clone()).unwrap_or_default(),
        ),
    };

    let source_props = eval_pattern_props(exec, row, &rp.source.properties)?;
    let target_props = eval_pattern_props(exec, row, &rp.target.properties)?;
    let Some(start) = resolve_endpoint(exec, row, &rp.source, &start_id, &source_props)? else {
        return Ok(Vec::new());
    };
    let Some(end) = resolve_endpoint(exec, row, &rp.target, &end_id, &target_props)? else {
        return Ok(Vec::new());
    };

    let mut r = row.clone();
    if let Some(v) = &rp.source.variable {
        r.insert(v.clone(), Value::Node(Box::new(start)));
    }
    if let Some(v) = &rp.target.variable {
        r.insert(v.clone(), Value::Node(Box::new(end)));
    }
    Ok(vec![r])
}

pub fn eval_pattern_props<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    props: &IndexMap<String, Expression>,
) -> Result<IndexMap<String, Value>> {
    let mut out = IndexMap::new();
    for (key, expr) in props {
        out.insert(key.clone(), exec.eval(expr, row)?);
    }
    Ok(out)
}

pub fn decode_edge_row(row: &Row) -> Result<EdgeObject> {
    let text = |key: &str| -> Result<String> {
        match row.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            other => Err(Error::StorageError(format!(
                "Malformed edge row: column {key} was {other:?}"
            ))),
        }
    };
    let properties = match row.get("properties") {
        Some(Value::String(json)) => match format::deep_parse_value(Value::String(json.clone())) {
            Value::Map(m) => m,
            _ => IndexMap::new(),
        },
        _ => IndexMap::new(),
    };
    Ok(EdgeObject {
        id: text("id")?,
        source: text("source_id")?,
        target: text("target_id")?,
        rel_type: Some(text("type")?),
        properties,
    })
}

// ============================================================================
// CREATE
// ============================================================================

fn apply_create<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &CreateClause,
) -> Result<PhaseContext> {
    let mut out = Vec::new();
    let mut next = ctx.clone();
    for row in &ctx.rows {
        let mut r = row.clone();
        create::create_patterns_in_row(exec, &mut r, &clause.patterns)?;
        for pattern in &clause.patterns {
            for var in pattern.variables() {
                if let Some(v) = r.get(var) {
                    next.note(var, v);
                }
            }
        }
        out.push(r);
    }
    Ok(next.with_rows(out))
}

// ============================================================================
// WITH / RETURN
// ============================================================================

pub fn apply_projection<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &ProjectionClause,
    is_return: bool,
) -> Result<PhaseContext> {
    if is_return {
        // Referring to a deleted entity in RETURN is an error, not a null.
        for item in &clause.items {
            let mut vars = Vec::new();
            item.expr.collect_variables(&mut vars);
            if let Some(var) = vars.iter().find(|v| ctx.deleted.contains(*v)) {
                return Err(Error::EntityNotFound(format!(
                    "Variable `{var}` was deleted earlier in the query"
                )));
            }
        }
    }

    let has_aggregate = clause.has_aggregate();
    let mut projected: Vec<(Row, Row)> = Vec::new(); // (scope row, output row)

    if has_aggregate {
        projected = aggregate_projection(exec, &ctx, clause)?;
        // A WHERE on an aggregating WITH is HAVING.
        if let Some(cond) = &clause.where_clause {
            let mut kept = Vec::new();
            for (scope, out) in projected {
                if exec.test(cond, &scope)? {
                    kept.push((scope, out));
                }
            }
            projected = kept;
        }
    } else {
        let mut rows = ctx.rows.clone();
        if let Some(cond) = &clause.where_clause {
            let mut kept = Vec::new();
            for row in rows {
                if exec.test(cond, &row)? {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        for row in rows {
            let mut out = if clause.star {
                // `*` passes all user bindings through; internal `__`-named
                // helpers stay behind.
                row.iter()
                    .filter(|(k, _)| !k.starts_with("__"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            } else {
                Row::new()
            };
            for item in &clause.items {
                out.insert(item.name(), exec.eval(&item.expr, &row)?);
            }
            // ORDER BY may reference pre-projection bindings.
            let mut scope = row;
            for (k, v) in &out {
                scope.insert(k.clone(), v.clone());
            }
            projected.push((scope, out));
        }
    }

    if clause.distinct {
        let mut seen = std::collections::HashSet::new();
        projected.retain(|(_, out)| {
            let key: Vec<String> = out
                .values()
                .map(|v| v.entity_id().map(str::to_string).unwrap_or_else(|| v.to_json().to_string()))
                .collect();
            seen.insert(key.join("\u{1f}"))
        });
    }

    if !clause.order_by.is_empty() {
        let mut keyed: Vec<(Vec<Value>, (Row, Row))> = Vec::new();
        for (scope, out) in projected {
            let mut keys = Vec::new();
            for order in &clause.order_by {
                keys.push(exec.eval(&order.expr, &scope)?);
            }
            keyed.push((keys, (scope, out)));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, order) in clause.order_by.iter().enumerate() {
                let ord = a[i].order_cmp(&b[i]);
                let ord = if order.ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        projected = keyed.into_iter().map(|(_, pair)| pair).collect();
    }

    let skip = eval_slice_bound(exec, clause.skip.as_ref())?;
    let limit = eval_slice_bound(exec, clause.limit.as_ref())?;
    let rows: Vec<Row> = projected.into_iter().map(|(_, out)| out).collect();
    let rows = format::apply_slice(rows, skip, limit);

    let mut next = ctx.with_rows(rows);
    if !is_return {
        // WITH re-scopes: only its outputs flow on.
        for row in &next.rows.clone() {
            for (k, v) in row {
                next.note(k, v);
            }
        }
    }
    Ok(next)
}

fn eval_slice_bound<S: SqlStore>(
    exec: &Executor<'_, S>,
    expr: Option<&Expression>,
) -> Result<Option<i64>> {
    match expr {
        None => Ok(None),
        Some(e) => {
            let v = exec.eval(e, &Row::new())?;
            v.as_int().map(Some).ok_or_else(|| {
                Error::EvaluationError(format!("SKIP/LIMIT must be an integer, got {}", v.type_name()))
            })
        }
    }
}

/// Group rows by the tuple of non-aggregate projections; reduce aggregates
/// per group. With no grouping keys and no input rows, aggregates reduce
/// over the empty set (count = 0, collect = []).
fn aggregate_projection<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: &PhaseContext,
    clause: &ProjectionClause,
) -> Result<Vec<(Row, Row)>> {
    let mut group_items = Vec::new();
    let mut agg_items = Vec::new();
    for item in &clause.items {
        if item.expr.contains_aggregate() {
            agg_items.push(item);
        } else {
            group_items.push(item);
        }
    }

    let mut groups: Vec<(Vec<Value>, Vec<&Row>)> = Vec::new();
    for row in &ctx.rows {
        let key: Vec<Value> = group_items
            .iter()
            .map(|item| exec.eval(&item.expr, row))
            .collect::<Result<_>>()?;
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    if groups.is_empty() && group_items.is_empty() {
        groups.push((Vec::new(), Vec::new()));
    }

    let mut out = Vec::new();
    for (key, members) in &groups {
        let mut row = Row::new();
        for (i, item) in group_items.iter().enumerate() {
            row.insert(item.name(), key[i].clone());
        }
        for item in &agg_items {
            row.insert(item.name(), reduce_aggregate(exec, &item.expr, members)?);
        }
        out.push((row.clone(), row));
    }
    Ok(out)
}

/// Reduce one aggregate projection item over a group of rows.
pub fn reduce_aggregate<S: SqlStore>(
    exec: &Executor<'_, S>,
    expr: &Expression,
    rows: &[&Row],
) -> Result<Value> {
    let Expression::Function { name, args, distinct } = expr else {
        return Err(Error::EvaluationError(
            "Aggregates must be top-level projection items".into(),
        ));
    };
    let lower = name.to_lowercase();

    if lower == "count" && args.is_empty() {
        return Ok(Value::Int(rows.len() as i64));
    }
    let Some(arg) = args.first() else {
        return Err(Error::EvaluationError(format!("{name}() requires an argument")));
    };

    let mut values = Vec::new();
    for row in rows {
        let v = exec.eval(arg, row)?;
        if !v.is_null() {
            values.push(v);
        }
    }
    if *distinct {
        let mut seen = std::collections::HashSet::new();
        values.retain(|v| seen.insert(v.to_json().to_string()));
    }

    match lower.as_str() {
        "count" => Ok(Value::Int(values.len() as i64)),
        "collect" => Ok(Value::List(values)),
        "sum" => {
            let mut sum_i: i64 = 0;
            let mut sum_f: f64 = 0.0;
            let mut has_float = false;
            for v in &values {
                match v {
                    Value::Int(i) => sum_i += i,
                    Value::Float(f) => {
                        has_float = true;
                        sum_f += f;
                    }
                    _ => {}
                }
            }
            if has_float {
                Ok(Value::Float(sum_i as f64 + sum_f))
            } else {
                Ok(Value::Int(sum_i))
            }
        }
        "avg" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let sum: f64 = values.iter().filter_map(|v| v.as_float()).sum();
            Ok(Value::Float(sum / values.len() as f64))
        }
        "min" => Ok(values
            .into_iter()
            .reduce(|a, b| {
                if a.cypher_cmp(&b) == Some(std::cmp::Ordering::Less) {
                    a
                } else {
                    b
                }
            })
            .unwrap_or(Value::Null)),
        "max" => Ok(values
            .into_iter()
            .reduce(|a, b| {
                if a.cypher_cmp(&b) == Some(std::cmp::Ordering::Greater) {
                    a
                } else {
                    b
                }
            })
            .unwrap_or(Value::Null)),
        _ => Err(Error::EvaluationError(format!("Unknown aggregate: {name}"))),
    }
}

// ============================================================================
// UNWIND
// ============================================================================

fn apply_unwind<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &UnwindClause,
) -> Result<PhaseContext> {
    let mut out = Vec::new();
    for row in &ctx.rows {
        let value = exec.eval(&clause.expr, row)?;
        match value {
            Value::List(items) => {
                for item in items {
                    let mut r = row.clone();
                    r.insert(clause.alias.clone(), item);
                    out.push(r);
                }
            }
            // UNWIND null expands to nothing; a non-list scalar to one row.
            Value::Null => {}
            other => {
                let mut r = row.clone();
                r.insert(clause.alias.clone(), other);
                out.push(r);
            }
        }
    }
    Ok(ctx.with_rows(out))
}

// ============================================================================
// SET / REMOVE
// ============================================================================

fn apply_set<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &SetClause,
) -> Result<PhaseContext> {
    let mut rows = ctx.rows.clone();
    for row in &mut rows {
        for item in &clause.items {
            apply_set_assignment(exec, row, item)?;
        }
    }
    Ok(ctx.with_rows(rows))
}

/// Apply one SET item against the entity bound in the row, updating both
/// storage and the in-row object so later clauses observe the new state.
pub fn apply_set_assignment<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &mut Row,
    item: &SetAssignment,
) -> Result<()> {
    let target = row.get(&item.variable).cloned().unwrap_or(Value::Null);
    match target {
        Value::Null => Ok(()), // SET on a null binding is a no-op
        Value::Node(mut node) => {
            if !item.labels.is_empty() {
                exec.add_labels(&node.id, &item.labels)?;
                row.insert(item.variable.clone(), Value::Node(node));
                return Ok(());
            }
            apply_property_change(exec, row, item, "nodes", &node.id, &mut node.properties)?;
            row.insert(item.variable.clone(), Value::Node(node));
            Ok(())
        }
        Value::Edge(mut edge) => {
            if !item.labels.is_empty() {
                return Err(Error::EvaluationError(
                    "Labels can only be set on nodes".into(),
                ));
            }
            apply_property_change(exec, row, item, "edges", &edge.id, &mut edge.properties)?;
            row.insert(item.variable.clone(), Value::Edge(edge));
            Ok(())
        }
        other => Err(Error::EvaluationError(format!(
            "SET target `{}` is {}, not an entity",
            item.variable,
            other.type_name()
        ))),
    }
}

fn apply_property_change<S: SqlStore>(
    exec: &Executor<'_, S>,
    row: &Row,
    item: &SetAssignment,
    table: &str,
    id: &str,
    in_row: &mut IndexMap<String, Value>,
) -> Result<()> {
    let value = match &item.value {
        Some(expr) => exec.eval(expr, row)?,
        None => Value::Null,
    };

    if let Some(key) = &item.property {
        // `SET n.k = null` deletes the property.
        if value.is_null() {
            exec.sql(
                &format!(
                    "UPDATE {table} SET properties = json_remove(properties, '$.{key}') WHERE id = ?"
                ),
                &[Value::String(id.to_string())],
            )?;
            in_row.shift_remove(key);
        } else {
            exec.sql(
                &format!(
                    "UPDATE {table} SET properties = json_set(properties, '$.{key}', json(?)) WHERE id = ?"
                ),
                &[
                    Value::String(value.to_json().to_string()),
                    Value::String(id.to_string()),
                ],
            )?;
            in_row.insert(key.clone(), value);
        }
    } else if item.replace_props {
        let map = as_property_map(&value)?;
        exec.sql(
            &format!("UPDATE {table} SET properties = json(?) WHERE id = ?"),
            &[
                Value::String(Value::Map(map.clone()).to_json().to_string()),
                Value::String(id.to_string()),
            ],
        )?;
        *in_row = map;
    } else if item.merge_props {
        let map = as_property_map(&value)?;
        exec.sql(
            &format!("UPDATE {table} SET properties = json_patch(properties, json(?)) WHERE id = ?"),
            &[
                Value::String(Value::Map(map.clone()).to_json().to_string()),
                Value::String(id.to_string()),
            ],
        )?;
        for (k, v) in map {
            if v.is_null() {
                in_row.shift_remove(&k);
            } else {
                in_row.insert(k, v);
            }
        }
    }
    exec.invalidate(id);
    Ok(())
}

fn as_property_map(value: &Value) -> Result<IndexMap<String, Value>> {
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

fn apply_remove<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &RemoveClause,
) -> Result<PhaseContext> {
    let mut rows = ctx.rows.clone();
    for row in &mut rows {
        for item in &clause.items {
            if let Some(property) = &item.property {
                // REMOVE n.k is SET n.k = null.
                let assignment = SetAssignment {
                    variable: item.variable.clone(),
                    property: Some(property.clone()),
                    labels: Vec::new(),
                    value: None,
                    replace_props: false,
                    merge_props: false,
                };
                apply_set_assignment(exec, row, &assignment)?;
            } else if let Some(Value::Node(node)) = row.get(&item.variable) {
                exec.remove_labels(&node.id, &item.labels)?;
            }
        }
    }
    Ok(ctx.with_rows(rows))
}

// ============================================================================
// DELETE
// ============================================================================

fn apply_delete<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &DeleteClause,
) -> Result<PhaseContext> {
    let mut next = ctx.clone();
    for row in &ctx.rows {
        for target in &clause.targets {
            let value = exec.eval(target, row)?;
            delete_value(exec, &value, clause.detach)?;
            if let Expression::Variable(var) = target {
                next.deleted.insert(var.clone());
            }
        }
    }
    Ok(next)
}

/// DETACH removes incident edges first; a plain DELETE of a node that still
/// has edges is a constraint violation.
pub fn delete_value<S: SqlStore>(exec: &Executor<'_, S>, value: &Value, detach: bool) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Node(node) => {
            if detach {
                exec.sql(
                    "DELETE FROM edges WHERE source_id = ? OR target_id = ?",
                    &[Value::String(node.id.clone()), Value::String(node.id.clone())],
                )?;
            } else {
                let incident = exec.sql(
                    "SELECT COUNT(*) AS c FROM edges WHERE source_id = ? OR target_id = ?",
                    &[Value::String(node.id.clone()), Value::String(node.id.clone())],
                )?;
                let count = incident
                    .rows
                    .first()
                    .and_then(|r| r.get("c"))
                    .and_then(|v| v.as_int())
                    .unwrap_or(0);
                if count > 0 {
                    return Err(Error::ConstraintViolation(format!(
                        "Cannot delete node {} because it still has {count} relationship(s)",
                        node.id
                    )));
                }
            }
            exec.sql("DELETE FROM nodes WHERE id = ?", &[Value::String(node.id.clone())])?;
            exec.invalidate(&node.id);
            Ok(())
        }
        Value::Edge(edge) => {
            exec.sql("DELETE FROM edges WHERE id = ?", &[Value::String(edge.id.clone())])?;
            exec.invalidate(&edge.id);
            Ok(())
        }
        Value::List(items) => {
            for item in items {
                delete_value(exec, item, detach)?;
            }
            Ok(())
        }
        other => Err(Error::EvaluationError(format!(
            "Cannot DELETE a {}",
            other.type_name()
        ))),
    }
}
