//! Translator collaborator.
//!
//! Lowers a single-phase query — `MATCH* ... RETURN ...` with constant
//! pattern properties — into one SQL SELECT over the `nodes`/`edges`
//! tables. The translator is deliberately conservative: anything it cannot
//! express exactly (variable-length patterns, OPTIONAL MATCH, predicates on
//! computed values, non-constant pattern properties) declines with `None`
//! and the engine picks a row-set strategy instead.
//!
//! Entity columns are emitted as `json_patch(json(props), json_object(...))`
//! so that a node or edge arrives at the formatter as a JSON object already
//! carrying its reserved keys.

use indexmap::IndexMap;

use crate::cypher::ast::{
    Clause, ComparisonOp, Expression, MatchClause, Pattern, ProjectionClause, Query,
    WhereCondition,
};
use crate::cypher::ast::EdgeDirection;
use crate::eval::{eval_expr, EvalContext, NoEntities};
use crate::model::{Row, Value};
use crate::Result;

/// One lowered statement.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Result of lowering a query.
#[derive(Debug, Clone)]
pub struct Translation {
    pub statements: Vec<SqlStatement>,
    pub return_columns: Vec<String>,
}

/// Lower a query, or decline with `None` when it exceeds the translatable
/// subset.
pub fn translate(query: &Query, params: &Row) -> Result<Option<Translation>> {
    let mut matches: Vec<&MatchClause> = Vec::new();
    let mut projection: Option<&ProjectionClause> = None;

    for clause in &query.clauses {
        match clause {
            Clause::Match(m) => {
                if projection.is_some() {
                    return Ok(None);
                }
                matches.push(m);
            }
            Clause::Return(r) => {
                if projection.is_some() {
                    return Ok(None);
                }
                projection = Some(r);
            }
            _ => return Ok(None),
        }
    }

    let (Some(projection), false) = (projection, matches.is_empty()) else {
        return Ok(None);
    };
    if projection.star || projection.items.is_empty() {
        return Ok(None);
    }

    let mut b = SelectBuilder::new(params);
    for m in &matches {
        for pattern in &m.patterns {
            if !b.add_pattern(pattern)? {
                return Ok(None);
            }
        }
    }
    for m in &matches {
        if let Some(cond) = &m.where_clause {
            match b.condition_sql(cond)? {
                Some(sql) => b.conditions.push(sql),
                None => return Ok(None),
            }
        }
    }

    b.build_select(projection)
}

// ============================================================================
// SELECT builder
// ============================================================================

enum VarRef {
    Node(String),
    Edge(String),
}

struct SelectBuilder<'a> {
    query_params: &'a Row,
    from: Vec<String>,
    conditions: Vec<String>,
    params: Vec<Value>,
    vars: IndexMap<String, VarRef>,
    next_node: usize,
    next_edge: usize,
}

impl<'a> SelectBuilder<'a> {
    fn new(query_params: &'a Row) -> Self {
        Self {
            query_params,
            from: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            vars: IndexMap::new(),
            next_node: 0,
            next_edge: 0,
        }
    }

    /// Register a pattern; `false` means "cannot translate".
    fn add_pattern(&mut self, pattern: &Pattern) -> Result<bool> {
        match pattern {
            Pattern::Node(np) => self.add_node(np),
            Pattern::Relationship(rp) => {
                if rp.edge.var_length {
                    return Ok(false);
                }
                let Some(src) = self.add_node_get_alias(&rp.source)? else {
                    return Ok(false);
                };
                let Some(tgt) = self.add_node_get_alias(&rp.target)? else {
                    return Ok(false);
                };

                let alias = format!("e{}", self.next_edge);
                self.next_edge += 1;
                self.from.push(format!("edges {alias}"));
                if let Some(var) = &rp.edge.variable {
                    if self.vars.contains_key(var) {
                        return Ok(false);
                    }
                    self.vars.insert(var.clone(), VarRef::Edge(alias.clone()));
                }

                match rp.edge.direction {
                    EdgeDirection::Right => {
                        self.conditions.push(format!("{alias}.source_id = {src}.id"));
                        self.conditions.push(format!("{alias}.target_id = {tgt}.id"));
                    }
                    EdgeDirection::Left => {
                        self.conditions.push(format!("{alias}.source_id = {tgt}.id"));
                        self.conditions.push(format!("{alias}.target_id = {src}.id"));
                    }
                    EdgeDirection::Undirected => {
                        self.conditions.push(format!(
                            "(({alias}.source_id = {src}.id AND {alias}.target_id = {tgt}.id) \
                             OR ({alias}.source_id = {tgt}.id AND {alias}.target_id = {src}.id))"
                        ));
                    }
                }
                if let Some(t) = &rp.edge.rel_type {
                    self.conditions.push(format!("{alias}.type = ?"));
                    self.params.push(Value::String(t.clone()));
                }
                if !self.add_property_filters(&alias, "properties", &rp.edge.properties)? {
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    fn add_node(&mut self, np: &crate::cypher::ast::NodePattern) -> Result<bool> {
        Ok(self.add_node_get_alias(np)?.is_some())
    }

    /// Register (or re-reference) a node pattern, returning its table alias.
    fn add_node_get_alias(
        &mut self,
        np: &crate::cypher::ast::NodePattern,
    ) -> Result<Option<String>> {
        if let Some(var) = &np.variable {
            if let Some(existing) = self.vars.get(var) {
                let alias = match existing {
                    VarRef::Node(a) => a.clone(),
                    VarRef::Edge(_) => return Ok(None),
                };
                // A re-reference may tighten the constraints.
                self.add_label_filters(&alias, &np.labels);
                if !self.add_property_filters(&alias, "properties", &np.properties)? {
                    return Ok(None);
                }
                return Ok(Some(alias));
            }
        }

        let alias = format!("n{}", self.next_node);
        self.next_node += 1;
        self.from.push(format!("nodes {alias}"));
        if let Some(var) = &np.variable {
            self.vars.insert(var.clone(), VarRef::Node(alias.clone()));
        }
        self.add_label_filters(&alias, &np.labels);
        if !self.add_property_filters(&alias, "properties", &np.properties)? {
            return Ok(None);
        }
        Ok(Some(alias))
    }

    fn add_label_filters(&mut self, alias: &str, labels: &[String]) {
        for label in labels {
            self.conditions.push(format!(
                "EXISTS (SELECT 1 FROM json_each({alias}.label) WHERE json_each.value = ?)"
            ));
            self.params.push(Value::String(label.clone()));
        }
    }

    fn add_property_filters(
        &mut self,
        alias: &str,
        column: &str,
        properties: &IndexMap<String, Expression>,
    ) -> Result<bool> {
        for (key, expr) in properties {
            let Some(value) = self.const_value(expr)? else {
                return Ok(false);
            };
            if value.is_null() {
                return Ok(false);
            }
            match &value {
                Value::List(_) | Value::Map(_) => {
                    self.conditions
                        .push(format!("json_extract({alias}.{column}, '$.{key}') = json(?)"));
                    self.params.push(Value::String(value.to_json().to_string()));
                }
                Value::Bool(b) => {
                    self.conditions
                        .push(format!("json_extract({alias}.{column}, '$.{key}') = ?"));
                    self.params.push(Value::Int(*b as i64));
                }
                _ => {
                    self.conditions
                        .push(format!("json_extract({alias}.{column}, '$.{key}') = ?"));
                    self.params.push(value);
                }
            }
        }
        Ok(true)
    }

    /// Evaluate an expression that references no variables; `None` when it
    /// does reference one.
    fn const_value(&self, expr: &Expression) -> Result<Option<Value>> {
        let mut vars = Vec::new();
        expr.collect_variables(&mut vars);
        if !vars.is_empty() || expr.contains_aggregate() {
            return Ok(None);
        }
        let row = Row::new();
        let cx = EvalContext { params: self.query_params, source: &NoEntities };
        eval_expr(expr, &row, &cx).map(Some)
    }

    // ========================================================================
    // Expressions → SQL
    // ========================================================================

    /// Scalar SQL for an expression; `None` declines.
    fn expr_sql(&mut self, expr: &Expression) -> Result<Option<String>> {
        match expr {
            Expression::Property { variable, key } => match self.vars.get(variable) {
                Some(VarRef::Node(a)) => {
                    Ok(Some(format!("json_extract({a}.properties, '$.{key}')")))
                }
                Some(VarRef::Edge(a)) => {
                    Ok(Some(format!("json_extract({a}.properties, '$.{key}')")))
                }
                None => Ok(None),
            },
            Expression::Variable(name) => match self.vars.get(name) {
                Some(VarRef::Node(a)) => Ok(Some(node_object_sql(a))),
                Some(VarRef::Edge(a)) => Ok(Some(edge_object_sql(a))),
                None => Ok(None),
            },
            Expression::Function { name, args, .. } => {
                let lower = name.to_lowercase();
                match (lower.as_str(), args.first()) {
                    ("id", Some(Expression::Variable(v))) => match self.vars.get(v) {
                        Some(VarRef::Node(a)) => Ok(Some(format!("{a}.id"))),
                        Some(VarRef::Edge(a)) => Ok(Some(format!("{a}.id"))),
                        None => Ok(None),
                    },
                    ("type", Some(Expression::Variable(v))) => match self.vars.get(v) {
                        Some(VarRef::Edge(a)) => Ok(Some(format!("{a}.type"))),
                        _ => Ok(None),
                    },
                    ("labels", Some(Expression::Variable(v))) => match self.vars.get(v) {
                        Some(VarRef::Node(a)) => Ok(Some(format!("{a}.label"))),
                        _ => Ok(None),
                    },
                    _ => self.const_sql(expr),
                }
            }
            _ => self.const_sql(expr),
        }
    }

    fn const_sql(&mut self, expr: &Expression) -> Result<Option<String>> {
        match self.const_value(expr)? {
            Some(v) => {
                self.params.push(v);
                Ok(Some("?".into()))
            }
            None => Ok(None),
        }
    }

    fn condition_sql(&mut self, cond: &WhereCondition) -> Result<Option<String>> {
        match cond {
            WhereCondition::And(a, b) => {
                let (Some(l), Some(r)) = (self.condition_sql(a)?, self.condition_sql(b)?) else {
                    return Ok(None);
                };
                Ok(Some(format!("({l} AND {r})")))
            }
            WhereCondition::Or(a, b) => {
                let (Some(l), Some(r)) = (self.condition_sql(a)?, self.condition_sql(b)?) else {
                    return Ok(None);
                };
                Ok(Some(format!("({l} OR {r})")))
            }
            WhereCondition::Not(inner) => match self.condition_sql(inner)? {
                Some(c) => Ok(Some(format!("NOT ({c})"))),
                None => Ok(None),
            },
            WhereCondition::Comparison { op, left, right } => {
                let (Some(l), Some(r)) = (self.expr_sql(left)?, self.expr_sql(right)?) else {
                    return Ok(None);
                };
                let op = match op {
                    ComparisonOp::Eq => "=",
                    ComparisonOp::Neq => "!=",
                    ComparisonOp::Lt => "<",
                    ComparisonOp::Lte => "<=",
                    ComparisonOp::Gt => ">",
                    ComparisonOp::Gte => ">=",
                    ComparisonOp::In => {
                        return Ok(Some(format!(
                            "EXISTS (SELECT 1 FROM json_each(json({r})) WHERE json_each.value = {l})"
                        )));
                    }
                    _ => return Ok(None),
                };
                Ok(Some(format!("{l} {op} {r}")))
            }
            WhereCondition::Expression(Expression::LabelPredicate { variable, labels }) => {
                let Some(VarRef::Node(alias)) = self.vars.get(variable) else {
                    return Ok(None);
                };
                let alias = alias.clone();
                let mut parts = Vec::new();
                for label in labels {
                    parts.push(format!(
                        "EXISTS (SELECT 1 FROM json_each({alias}.label) WHERE json_each.value = ?)"
                    ));
                    self.params.push(Value::String(label.clone()));
                }
                Ok(Some(parts.join(" AND ")))
            }
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Final SELECT
    // ========================================================================

    fn build_select(mut self, projection: &ProjectionClause) -> Result<Option<Translation>> {
        let has_aggregate = projection.has_aggregate();

        let mut select_parts = Vec::new();
        let mut group_by = Vec::new();
        let mut return_columns = Vec::new();

        for item in &projection.items {
            let name = item.name();
            let sql = if item.expr.contains_aggregate() {
                match self.aggregate_sql(&item.expr)? {
                    Some(sql) => sql,
                    None => return Ok(None),
                }
            } else {
                match self.expr_sql(&item.expr)? {
                    Some(sql) => {
                        if has_aggregate {
                            group_by.push(sql.clone());
                        }
                        sql
                    }
                    None => return Ok(None),
                }
            };
            select_parts.push(format!("{sql} AS {}", quote_column(&name)));
            return_columns.push(name);
        }

        let distinct = if projection.distinct && !has_aggregate { "DISTINCT " } else { "" };
        let mut sql = format!(
            "SELECT {distinct}{} FROM {}",
            select_parts.join(", "),
            self.from.join(", ")
        );
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !group_by.is_empty() && has_aggregate {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }

        if !projection.order_by.is_empty() {
            let mut order_parts = Vec::new();
            for order in &projection.order_by {
                // An ORDER BY key may name an output column or any
                // translatable expression.
                let key = match &order.expr {
                    Expression::Variable(v) if return_columns.contains(v) => quote_column(v),
                    other => match self.expr_sql(other)? {
                        Some(sql) => sql,
                        None => return Ok(None),
                    },
                };
                order_parts.push(format!(
                    "{key} {}",
                    if order.ascending { "ASC" } else { "DESC" }
                ));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_parts.join(", "));
        }

        let skip = match &projection.skip {
            Some(e) => match self.const_value(e)?.and_then(|v| v.as_int()) {
                Some(n) => Some(n),
                None => return Ok(None),
            },
            None => None,
        };
        let limit = match &projection.limit {
            Some(e) => match self.const_value(e)?.and_then(|v| v.as_int()) {
                Some(n) => Some(n),
                None => return Ok(None),
            },
            None => None,
        };
        match (limit, skip) {
            (Some(l), Some(s)) => sql.push_str(&format!(" LIMIT {l} OFFSET {s}")),
            (Some(l), None) => sql.push_str(&format!(" LIMIT {l}")),
            (None, Some(s)) => sql.push_str(&format!(" LIMIT -1 OFFSET {s}")),
            (None, None) => {}
        }

        Ok(Some(Translation {
            statements: vec![SqlStatement { sql, params: self.params }],
            return_columns,
        }))
    }

    /// SQL for an aggregate projection item.
    fn aggregate_sql(&mut self, expr: &Expression) -> Result<Option<String>> {
        let Expression::Function { name, args, distinct } = expr else {
            // Aggregates nested inside arithmetic are left to the engine.
            return Ok(None);
        };
        let lower = name.to_lowercase();
        let distinct_kw = if *distinct { "DISTINCT " } else { "" };

        if lower == "count" && args.is_empty() {
            return Ok(Some("COUNT(*)".into()));
        }
        let Some(arg) = args.first() else {
            return Ok(None);
        };

        // collect() must preserve JSON structure for entities.
        if lower == "collect" {
            let inner = match arg {
                Expression::Variable(v) => match self.vars.get(v) {
                    Some(VarRef::Node(a)) => node_object_sql(a),
                    Some(VarRef::Edge(a)) => edge_object_sql(a),
                    None => return Ok(None),
                },
                other => match self.expr_sql(other)? {
                    Some(sql) => sql,
                    None => return Ok(None),
                },
            };
            return Ok(Some(format!("json_group_array({distinct_kw}{inner})")));
        }

        let Some(inner) = self.expr_sql(arg)? else {
            return Ok(None);
        };
        let func = match lower.as_str() {
            "count" => "COUNT",
            "sum" => "SUM",
            "avg" => "AVG",
            "min" => "MIN",
            "max" => "MAX",
            _ => return Ok(None),
        };
        Ok(Some(format!("{func}({distinct_kw}{inner})")))
    }
}

/// A node as a JSON object carrying `_nf_id`.
fn node_object_sql(alias: &str) -> String {
    format!("json_patch(json({alias}.properties), json_object('_nf_id', {alias}.id))")
}

/// An edge as a JSON object carrying `_nf_id`, endpoints and type.
fn edge_object_sql(alias: &str) -> String {
    format!(
        "json_patch(json({alias}.properties), json_object(\
         '_nf_id', {alias}.id, '_nf_start', {alias}.source_id, \
         '_nf_end', {alias}.target_id, '_nf_type', {alias}.type))"
    )
}

fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
