//! General multi-phase resolver: MATCH → mutation → RETURN.
//!
//! Phase A captures a per-row binding snapshot — entity objects (which
//! carry their ids and, for edges, their types), explicit `_id_<var>`
//! columns, and the values of WITH property aliases — through one
//! translator statement. Phase B applies CREATE/SET/DELETE per captured
//! row, updating the snapshot as it goes. Phase C evaluates RETURN against
//! the captured rows, never against storage, which may have been mutated.

use tracing::debug;

use crate::cypher::ast::{Clause, Expression, MatchClause, ProjectionClause, Query};
use crate::model::Row;
use crate::storage::SqlStore;
use crate::translate;
use crate::Result;

use super::clauses::{self, apply_clause, apply_projection};
use super::context::PhaseContext;
use super::create;
use super::format;
use super::planner;
use super::Executor;

/// Claim check + execution. Claims a `MATCH+ [WITH]? mutation* [RETURN]?`
/// stream where a mutation follows the MATCH, or where RETURN leans on
/// WITH property/aggregate aliases.
pub fn run<S: SqlStore>(exec: &Executor<'_, S>, query: &Query) -> Result<Option<Vec<Row>>> {
    let Some(shape) = Shape::of(query) else {
        return Ok(None);
    };

    let alias_info = planner::collect_alias_info(query);
    let has_mutation = !shape.mutations.is_empty();
    let return_uses_alias = shape.returning.map(|r| references_alias(r, &alias_info)).unwrap_or(false);
    if !has_mutation && !return_uses_alias {
        return Ok(None);
    }

    // ------------------------------------------------------------------
    // Phase A: id capture.
    // ------------------------------------------------------------------
    let ctx = capture_phase(exec, &shape, query)?;
    debug!(rows = ctx.rows.len(), "multi-phase capture complete");

    // ------------------------------------------------------------------
    // Phase B: per-row mutation against resolved ids.
    // ------------------------------------------------------------------
    let mut ctx = ctx;
    for clause in shape.mutations {
        match clause {
            Clause::Create(c) => {
                let mut rows = std::mem::take(&mut ctx.rows);
                for row in &mut rows {
                    create::create_patterns_in_row(exec, row, &c.patterns)?;
                }
                ctx.rows = rows;
            }
            Clause::Set(s) => {
                let mut rows = std::mem::take(&mut ctx.rows);
                for row in &mut rows {
                    for item in &s.items {
                        clauses::apply_set_assignment(exec, row, item)?;
                    }
                }
                ctx.rows = rows;
            }
            Clause::Remove(_) | Clause::Delete(_) => {
                ctx = apply_clause(exec, ctx, clause)?;
            }
            _ => unreachable!("shape check admits only mutations here"),
        }
    }

    // ------------------------------------------------------------------
    // Phase C: RETURN over the captured rows and their side tables.
    // ------------------------------------------------------------------
    match shape.returning {
        Some(ret) => {
            let ctx = apply_projection(exec, ctx, ret, true)?;
            Ok(Some(ctx.rows))
        }
        None => Ok(Some(Vec::new())),
    }
}

/// The clause stream decomposed into the multi-phase shape.
struct Shape<'q> {
    matches: Vec<&'q MatchClause>,
    with: Option<&'q ProjectionClause>,
    mutations: Vec<&'q Clause>,
    returning: Option<&'q ProjectionClause>,
}

impl<'q> Shape<'q> {
    fn of(query: &'q Query) -> Option<Self> {
        let mut matches = Vec::new();
        let mut with = None;
        let mut mutations = Vec::new();
        let mut returning = None;

        let mut clauses = query.clauses.iter().peekable();
        while let Some(Clause::Match(m)) = clauses.peek().copied() {
            matches.push(m);
            clauses.next();
        }
        if matches.is_empty() {
            return None;
        }
        if let Some(Clause::With(w)) = clauses.peek().copied() {
            // A filtering or `WITH *` projection needs the row-set
            // operators; this resolver only captures explicit items.
            if w.where_clause.is_some() || w.star {
                return None;
            }
            with = Some(w);
            clauses.next();
        }
        for clause in clauses {
            match clause {
                Clause::Create(_) | Clause::Set(_) | Clause::Delete(_) | Clause::Remove(_) => {
                    if returning.is_some() {
                        return None;
                    }
                    mutations.push(clause);
                }
                Clause::Return(r) => {
                    if returning.is_some() {
                        return None;
                    }
                    returning = Some(r);
                }
                _ => return None,
            }
        }
        Some(Self { matches, with, mutations, returning })
    }
}

fn references_alias(clause: &ProjectionClause, info: &planner::AliasInfo) -> bool {
    clause.items.iter().any(|item| {
        let mut vars = Vec::new();
        item.expr.collect_variables(&mut vars);
        vars.iter().any(|v| info.aggregate.contains(v) || info.property.contains_key(v))
    })
}

/// Build and run the synthetic capture RETURN.
fn capture_phase<S: SqlStore>(
    exec: &Executor<'_, S>,
    shape: &Shape<'_>,
    query: &Query,
) -> Result<PhaseContext> {
    let items = match shape.with {
        // With a WITH in play its items *are* the captured columns (the
        // clause may aggregate, which the translator lowers to GROUP BY).
        Some(with) => with.items.clone(),
        None => {
            // Capture every matched variable used downstream, as the
            // object plus an explicit `_id_<var>` column.
            let mut needed: Vec<String> = Vec::new();
            let mut note = |vars: Vec<String>| {
                for v in vars {
                    if !needed.contains(&v) {
                        needed.push(v);
                    }
                }
            };
            for &clause in &shape.mutations {
                note(clause_variables(clause));
            }
            if let Some(ret) = shape.returning {
                for item in &ret.items {
                    let mut vars = Vec::new();
                    item.expr.collect_variables(&mut vars);
                    note(vars);
                }
                for order in &ret.order_by {
                    let mut vars = Vec::new();
                    order.expr.collect_variables(&mut vars);
                    note(vars);
                }
            }
            let matched: Vec<String> = shape
                .matches
                .iter()
                .flat_map(|m| m.patterns.iter())
                .flat_map(|p| p.variables().into_iter().map(str::to_string))
                .collect();
            needed.retain(|v| matched.contains(v));

            let mut items = Vec::new();
            for var in needed {
                items.push(crate::cypher::ast::ProjectionItem {
                    expr: Expression::Variable(var.clone()),
                    alias: None,
                });
                items.push(crate::cypher::ast::ProjectionItem {
                    expr: Expression::Function {
                        name: "id".into(),
                        args: vec![Expression::Variable(var.clone())],
                        distinct: false,
                    },
                    alias: Some(format!("_id_{var}")),
                });
            }
            items
        }
    };

    // The WITH's ordering and slicing shape the captured row set.
    let (distinct, order_by, skip, limit) = match shape.with {
        Some(w) => (w.distinct, w.order_by.clone(), w.skip.clone(), w.limit.clone()),
        None => (false, Vec::new(), None, None),
    };
    let synthetic = Query {
        clauses: shape
            .matches
            .iter()
            .map(|m| Clause::Match((*m).clone()))
            .chain(std::iter::once(Clause::Return(ProjectionClause {
                distinct,
                star: false,
                items,
                where_clause: None,
                order_by,
                skip,
                limit,
            })))
            .collect(),
    };

    if let Some(translation) = translate::translate(&synthetic, exec.params())? {
        let mut rows = Vec::new();
        for stmt in &translation.statements {
            let result = exec.sql(&stmt.sql, &stmt.params)?;
            rows.extend(result.rows.into_iter().map(format::deep_parse_row));
        }
        return Ok(PhaseContext::from_rows(rows));
    }

    // Translator exceeded: capture through the row-set operators instead.
    let mut ctx = PhaseContext::unit();
    for (i, clause) in query.clauses.iter().enumerate() {
        let in_front = i < shape.matches.len() + usize::from(shape.with.is_some());
        if in_front {
            ctx = apply_clause(exec, ctx, clause)?;
        }
    }
    Ok(ctx)
}

fn clause_variables(clause: &Clause) -> Vec<String> {
    let mut vars = Vec::new();
    match clause {
        Clause::Create(c) => {
            for pattern in &c.patterns {
                match pattern {
                    crate::cypher::ast::Pattern::Node(np) => {
                        for value in np.properties.values() {
                            value.collect_variables(&mut vars);
                        }
                    }
                    crate::cypher::ast::Pattern::Relationship(rp) => {
                        for np in [&rp.source, &rp.target] {
                            if let Some(v) = &np.variable {
                                vars.push(v.clone());
                            }
                            for value in np.properties.values() {
                                value.collect_variables(&mut vars);
                            }
                        }
                        for value in rp.edge.properties.values() {
                            value.collect_variables(&mut vars);
                        }
                    }
                }
            }
        }
        Clause::Set(s) => {
            for item in &s.items {
                vars.push(item.variable.clone());
                if let Some(value) = &item.value {
                    value.collect_variables(&mut vars);
                }
            }
        }
        Clause::Remove(r) => {
            for item in &r.items {
                vars.push(item.variable.clone());
            }
        }
        Clause::Delete(d) => {
            for target in &d.targets {
                target.collect_variables(&mut vars);
            }
        }
        _ => {}
    }
    vars
}
