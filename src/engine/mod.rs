//! Query execution engine.
//!
//! The [`Executor`] owns one query's execution: it validates the AST,
//! opens a single storage transaction, and walks the strategy cascade.
//! The cascade order is contractual — several specialized strategies
//! produce different results than the general multi-phase path would:
//!
//! 1. phased row-set execution (aggregation boundaries, OPTIONAL MATCH,
//!    CREATE→WITH, MATCH/CREATE mixed with bare MERGE)
//! 2. UNWIND+CREATE  3. UNWIND+MERGE
//! 4. MATCH+WITH(COLLECT)+UNWIND  5. MATCH+WITH(COLLECT)+DELETE
//! 6. CREATE+RETURN  7. MERGE engine  8. bound relationship-list path
//! 9. general multi-phase MATCH→mutation→RETURN
//! 10. fast path through the translator, with the row-set engine as the
//!     fallback when the query exceeds what the translator can express.
//!
//! The specialized shapes (2–8) are checked before the phased claim: each
//! of them would otherwise trip a phase trigger, and their whole point is
//! to replace generic phasing for their shape.

pub mod clauses;
pub mod context;
pub mod create;
pub mod format;
pub mod merge;
pub mod multiphase;
pub mod pipelines;
pub mod planner;

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::cypher::ast::{Clause, Query};
use crate::eval::{eval_condition, eval_expr, EntitySource, EvalContext};
use crate::model::{NodeObject, Row, Value};
use crate::storage::{SqlResult, SqlStore};
use crate::translate;
use crate::Result;

// ============================================================================
// Results
// ============================================================================

/// Execution metadata returned with every successful query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryMeta {
    pub count: usize,
    pub time_ms: u64,
}

/// A successful query result: ordered rows plus metadata. No rows is an
/// empty list, never null.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub data: Vec<Row>,
    pub meta: QueryMeta,
}

// ============================================================================
// Executor
// ============================================================================

enum CachedEntity {
    Node { node: NodeObject, labels: Vec<String> },
    Edge(crate::model::EdgeObject),
}

/// One query's execution state: the storage handle (owned exclusively for
/// the query's duration), the read-only parameter map, and a property
/// cache keyed by entity id, cleared at the start of every query.
pub struct Executor<'a, S: SqlStore> {
    store: &'a S,
    params: Row,
    cache: RefCell<HashMap<String, CachedEntity>>,
}

impl<'a, S: SqlStore> Executor<'a, S> {
    pub fn new(store: &'a S, params: Row) -> Self {
        Self { store, params, cache: RefCell::new(HashMap::new()) }
    }

    /// Validate, execute inside one transaction, format.
    pub fn run(&self, query: &Query) -> Result<QueryResult> {
        let started = Instant::now();
        self.cache.borrow_mut().clear();
        planner::validate(query, &self.params)?;

        let rows = self.store.transaction(|| self.dispatch(query))?;

        let data = match final_return(query) {
            Some(ret) if ret.star => format::finalize_star_rows(rows),
            Some(ret) => {
                let columns: Vec<String> = ret.items.iter().map(|i| i.name()).collect();
                format::finalize_rows(rows, &columns)
            }
            None => Vec::new(),
        };
        Ok(QueryResult {
            meta: QueryMeta {
                count: data.len(),
                time_ms: started.elapsed().as_millis() as u64,
            },
            data,
        })
    }

    /// The ordered strategy cascade. The first claimant wins; a query no
    /// strategy claims is an internal bug, reported as an error rather
    /// than an empty result.
    fn dispatch(&self, query: &Query) -> Result<Vec<Row>> {
        if let Some(rows) = pipelines::unwind_create(self, query)? {
            debug!(strategy = "unwind-create", "dispatch");
            return Ok(rows);
        }
        if let Some(rows) = pipelines::unwind_merge(self, query)? {
            debug!(strategy = "unwind-merge", "dispatch");
            return Ok(rows);
        }
        if let Some(rows) = pipelines::match_collect_unwind(self, query)? {
            debug!(strategy = "match-collect-unwind", "dispatch");
            return Ok(rows);
        }
        if let Some(rows) = pipelines::match_collect_delete(self, query)? {
            debug!(strategy = "match-collect-delete", "dispatch");
            return Ok(rows);
        }
        if let Some(rows) = pipelines::create_return(self, query)? {
            debug!(strategy = "create-return", "dispatch");
            return Ok(rows);
        }
        if let Some(rows) = pipelines::merge_query(self, query)? {
            debug!(strategy = "merge", "dispatch");
            return Ok(rows);
        }
        if let Some(rows) = pipelines::bound_relationship_path(self, query)? {
            debug!(strategy = "bound-relationship-path", "dispatch");
            return Ok(rows);
        }

        if requires_phases(query) {
            let phases = planner::plan_phases(query);
            debug!(strategy = "phased", phases = phases.len(), "dispatch");
            return pipelines::run_clauses(self, query);
        }

        if let Some(rows) = multiphase::run(self, query)? {
            debug!(strategy = "multi-phase", "dispatch");
            return Ok(rows);
        }

        // Fast path: one translated statement. The engine is responsible
        // for detecting when a query exceeds the translator; those run
        // through the row-set operators instead.
        if let Some(translation) = translate::translate(query, &self.params)? {
            debug!(strategy = "fast-path", "dispatch");
            let mut rows = Vec::new();
            for stmt in &translation.statements {
                let result = self.sql(&stmt.sql, &stmt.params)?;
                rows.extend(result.rows.into_iter().map(format::deep_parse_row));
            }
            for row in &mut rows {
                for col in &translation.return_columns {
                    if col.starts_with("labels(") {
                        if let Some(v) = row.get(col).cloned() {
                            row.insert(col.clone(), format::normalize_labels(v));
                        }
                    }
                }
            }
            return Ok(rows);
        }

        // The row-set operators execute any remaining clause stream
        // (CALL/UNION surface their unsupported error from inside).
        debug!(strategy = "row-set-fallback", "dispatch");
        pipelines::run_clauses(self, query)
    }

    // ========================================================================
    // Shared services
    // ========================================================================

    pub(crate) fn params(&self) -> &Row {
        &self.params
    }

    /// Run one SQL statement against the collaborator.
    pub(crate) fn sql(&self, sql: &str, params: &[Value]) -> Result<SqlResult> {
        trace!(sql, params = params.len(), "execute");
        self.store.execute(sql, params)
    }

    pub(crate) fn eval(&self, expr: &crate::cypher::ast::Expression, row: &Row) -> Result<Value> {
        let cx = EvalContext { params: &self.params, source: self };
        eval_expr(expr, row, &cx)
    }

    pub(crate) fn test(
        &self,
        cond: &crate::cypher::ast::WhereCondition,
        row: &Row,
    ) -> Result<bool> {
        let cx = EvalContext { params: &self.params, source: self };
        eval_condition(cond, row, &cx)
    }

    pub(crate) fn invalidate(&self, id: &str) {
        self.cache.borrow_mut().remove(id);
    }

    /// Node lookup by id, through the per-query cache.
    pub(crate) fn node_by_id(&self, id: &str) -> Result<Option<NodeObject>> {
        if let Some(CachedEntity::Node { node, .. }) = self.cache.borrow().get(id) {
            return Ok(Some(node.clone()));
        }
        self.fetch_node(id).map(|found| found.map(|(node, _)| node))
    }

    pub(crate) fn node_labels(&self, id: &str) -> Result<Vec<String>> {
        if let Some(CachedEntity::Node { labels, .. }) = self.cache.borrow().get(id) {
            return Ok(labels.clone());
        }
        Ok(self.fetch_node(id)?.map(|(_, labels)| labels).unwrap_or_default())
    }

    fn fetch_node(&self, id: &str) -> Result<Option<(NodeObject, Vec<String>)>> {
        let result = self.sql(
            "SELECT label, properties FROM nodes WHERE id = ?",
            &[Value::String(id.to_string())],
        )?;
        let Some(row) = result.rows.first() else {
            return Ok(None);
        };
        let labels = decode_labels(row.get("label"));
        let properties = decode_properties(row.get("properties"));
        let node = NodeObject::with_properties(id.to_string(), properties);
        self.cache.borrow_mut().insert(
            id.to_string(),
            CachedEntity::Node { node: node.clone(), labels: labels.clone() },
        );
        Ok(Some((node, labels)))
    }

    pub(crate) fn edge_by_id(&self, id: &str) -> Result<Option<crate::model::EdgeObject>> {
        if let Some(CachedEntity::Edge(edge)) = self.cache.borrow().get(id) {
            return Ok(Some(edge.clone()));
        }
        let result = self.sql(
            "SELECT id, type, source_id, target_id, properties FROM edges WHERE id = ?",
            &[Value::String(id.to_string())],
        )?;
        let Some(row) = result.rows.first() else {
            return Ok(None);
        };
        let edge = clauses::decode_edge_row(row)?;
        self.cache
            .borrow_mut()
            .insert(id.to_string(), CachedEntity::Edge(edge.clone()));
        Ok(Some(edge))
    }

    /// All nodes carrying the given labels and exact property values.
    pub(crate) fn find_nodes(
        &self,
        labels: &[String],
        props: &IndexMap<String, Value>,
    ) -> Result<Vec<NodeObject>> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for label in labels {
            conditions
                .push("EXISTS (SELECT 1 FROM json_each(label) WHERE json_each.value = ?)".into());
            params.push(Value::String(label.clone()));
        }
        for (key, value) in props {
            push_property_condition(&mut conditions, &mut params, key, value);
        }
        let sql = if conditions.is_empty() {
            "SELECT id, label, properties FROM nodes".to_string()
        } else {
            format!(
                "SELECT id, label, properties FROM nodes WHERE {}",
                conditions.join(" AND ")
            )
        };
        let result = self.sql(&sql, &params)?;

        let mut out = Vec::new();
        for row in result.rows {
            let Some(Value::String(id)) = row.get("id") else {
                continue;
            };
            let labels = decode_labels(row.get("label"));
            let node =
                NodeObject::with_properties(id.clone(), decode_properties(row.get("properties")));
            self.cache.borrow_mut().insert(
                id.clone(),
                CachedEntity::Node { node: node.clone(), labels },
            );
            out.push(node);
        }
        Ok(out)
    }

    /// Edges matching type, endpoints and exact property values.
    /// `undirected` also accepts the swapped orientation.
    pub(crate) fn find_edges(
        &self,
        rel_type: &str,
        source_id: &str,
        target_id: &str,
        props: &IndexMap<String, Value>,
        undirected: bool,
    ) -> Result<Vec<crate::model::EdgeObject>> {
        let mut conditions = vec!["type = ?".to_string()];
        let mut params = vec![Value::String(rel_type.to_string())];
        if undirected {
            conditions.push(
                "((source_id = ? AND target_id = ?) OR (source_id = ? AND target_id = ?))".into(),
            );
            params.push(Value::String(source_id.to_string()));
            params.push(Value::String(target_id.to_string()));
            params.push(Value::String(target_id.to_string()));
            params.push(Value::String(source_id.to_string()));
        } else {
            conditions.push("source_id = ? AND target_id = ?".into());
            params.push(Value::String(source_id.to_string()));
            params.push(Value::String(target_id.to_string()));
        }
        for (key, value) in props {
            push_property_condition(&mut conditions, &mut params, key, value);
        }
        let sql = format!(
            "SELECT id, type, source_id, target_id, properties FROM edges WHERE {}",
            conditions.join(" AND ")
        );
        let result = self.sql(&sql, &params)?;
        result.rows.iter().map(clauses::decode_edge_row).collect()
    }

    /// Label set-union on a stored node.
    pub(crate) fn add_labels(&self, id: &str, add: &[String]) -> Result<()> {
        let mut labels = self.node_labels(id)?;
        for label in add {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        self.write_labels(id, &labels)
    }

    pub(crate) fn remove_labels(&self, id: &str, remove: &[String]) -> Result<()> {
        let labels: Vec<String> = self
            .node_labels(id)?
            .into_iter()
            .filter(|l| !remove.contains(l))
            .collect();
        self.write_labels(id, &labels)
    }

    fn write_labels(&self, id: &str, labels: &[String]) -> Result<()> {
        self.sql(
            "UPDATE nodes SET label = ? WHERE id = ?",
            &[
                Value::String(create::labels_json(labels)),
                Value::String(id.to_string()),
            ],
        )?;
        self.invalidate(id);
        Ok(())
    }
}

impl<S: SqlStore> EntitySource for Executor<'_, S> {
    fn entity_by_id(&self, id: &str) -> Result<Option<Value>> {
        if let Some(node) = self.node_by_id(id)? {
            return Ok(Some(Value::Node(Box::new(node))));
        }
        if let Some(edge) = self.edge_by_id(id)? {
            return Ok(Some(Value::Edge(Box::new(edge))));
        }
        Ok(None)
    }

    fn labels_of(&self, id: &str) -> Result<Vec<String>> {
        self.node_labels(id)
    }
}

// ============================================================================
// Dispatch helpers
// ============================================================================

/// Phased row-set execution is required for aggregation/slicing phase
/// boundaries, OPTIONAL MATCH null semantics, CREATE followed by WITH
/// (fresh ids must be visible in the row set), and MATCH/CREATE mixed with
/// MERGE lacking ON CREATE/ON MATCH handlers.
fn requires_phases(query: &Query) -> bool {
    if planner::plan_phases(query).len() > 1 {
        return true;
    }
    if query.clauses.iter().any(|c| matches!(c, Clause::OptionalMatch(_))) {
        return true;
    }

    let mut seen_create = false;
    for clause in &query.clauses {
        match clause {
            Clause::Create(_) => seen_create = true,
            Clause::With(_) if seen_create => return true,
            _ => {}
        }
    }

    let has_pattern_clause = query
        .clauses
        .iter()
        .any(|c| matches!(c, Clause::Match(_) | Clause::Create(_)));
    let has_bare_merge = query.clauses.iter().any(|c| {
        matches!(c, Clause::Merge(m) if m.on_create.is_empty() && m.on_match.is_empty())
    });
    has_pattern_clause && has_bare_merge
}

fn final_return(query: &Query) -> Option<&crate::cypher::ast::ProjectionClause> {
    query.clauses.iter().rev().find_map(|c| match c {
        Clause::Return(r) => Some(r),
        _ => None,
    })
}

fn decode_labels(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(json)) => serde_json::from_str::<Vec<String>>(json).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn decode_properties(value: Option<&Value>) -> IndexMap<String, Value> {
    match value {
        Some(Value::String(json)) => {
            match format::deep_parse_value(Value::String(json.clone())) {
                Value::Map(m) => m,
                _ => IndexMap::new(),
            }
        }
        _ => IndexMap::new(),
    }
}

/// Equality condition on a JSON property, binding containers through
/// `json(?)` and booleans as their stored 0/1 form.
pub(crate) fn push_property_condition(
    conditions: &mut Vec<String>,
    params: &mut Vec<Value>,
    key: &str,
    value: &Value,
) {
    match value {
        Value::List(_) | Value::Map(_) => {
            conditions.push(format!("json_extract(properties, '$.{key}') = json(?)"));
            params.push(Value::String(value.to_json().to_string()));
        }
        Value::Bool(b) => {
            conditions.push(format!("json_extract(properties, '$.{key}') = ?"));
            params.push(Value::Int(*b as i64));
        }
        _ => {
            conditions.push(format!("json_extract(properties, '$.{key}') = ?"));
            params.push(value.clone());
        }
    }
}
