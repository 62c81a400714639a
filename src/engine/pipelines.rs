//! Specialized execution strategies.
//!
//! Each strategy inspects the clause stream and either claims the query —
//! returning its result rows — or declines with `None` so the dispatcher
//! moves on. The claims are shape checks; execution is built from the
//! shared row-set operators, with strategy-specific twists (batched
//! inserts, SQL-side COLLECT, bound-list path following).

use crate::cypher::ast::{Clause, CreateClause, Expression, Pattern, Query};
use crate::model::{NodeObject, Row, Value};
use crate::storage::SqlStore;
use crate::translate;
use crate::Result;

use super::clauses::{apply_clause, eval_pattern_props};
use super::context::PhaseContext;
use super::create;
use super::format;
use super::Executor;

/// Run the clause stream through the row-set operators, returning the
/// RETURN clause's rows (empty when the query has no RETURN).
pub fn run_clauses<S: SqlStore>(exec: &Executor<'_, S>, query: &Query) -> Result<Vec<Row>> {
    let mut ctx = PhaseContext::unit();
    let mut returned = false;
    for clause in &query.clauses {
        returned = matches!(clause, Clause::Return(_));
        ctx = apply_clause(exec, ctx, clause)?;
    }
    Ok(if returned { ctx.rows } else { Vec::new() })
}

// ============================================================================
// UNWIND+CREATE / UNWIND+MERGE
// ============================================================================

/// Claims pattern-free pipelines `{UNWIND+, WITH*, CREATE*, RETURN?}`.
/// CREATEs inside the unwound product are batched.
pub fn unwind_create<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let mut unwinds = 0;
    for clause in &query.clauses {
        match clause {
            Clause::Unwind(_) => unwinds += 1,
            Clause::Create(_) | Clause::Return(_) => {}
            Clause::With(w) if !w.has_aggregate() => {}
            _ => return Ok(None),
        }
    }
    if unwinds == 0 {
        return Ok(None);
    }

    let mut ctx = PhaseContext::unit();
    let mut returned = false;
    for clause in &query.clauses {
        returned = matches!(clause, Clause::Return(_));
        ctx = match clause {
            Clause::Create(c) => batched_create(exec, ctx, c)?,
            other => apply_clause(exec, ctx, other)?,
        };
    }
    Ok(Some(if returned { ctx.rows } else { Vec::new() }))
}

/// Claims `{UNWIND+, WITH*, MERGE+, RETURN?}`.
pub fn unwind_merge<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let (mut unwinds, mut merges) = (0, 0);
    for clause in &query.clauses {
        match clause {
            Clause::Unwind(_) => unwinds += 1,
            Clause::Merge(_) => merges += 1,
            Clause::Return(_) => {}
            Clause::With(w) if !w.has_aggregate() => {}
            _ => return Ok(None),
        }
    }
    if unwinds == 0 || merges == 0 {
        return Ok(None);
    }
    run_clauses(exec, query).map(Some)
}

/// CREATE over many incoming rows: node inserts are collected into
/// multi-VALUES batches; relationships (whose endpoints may reference
/// nodes created in the same iteration) run row by row.
fn batched_create<S: SqlStore>(
    exec: &Executor<'_, S>,
    ctx: PhaseContext,
    clause: &CreateClause,
) -> Result<PhaseContext> {
    let node_patterns: Vec<_> = clause
        .patterns
        .iter()
        .filter_map(|p| match p {
            Pattern::Node(np) => Some(np),
            _ => None,
        })
        .collect();
    let rel_patterns: Vec<_> = clause
        .patterns
        .iter()
        .filter_map(|p| match p {
            Pattern::Relationship(_) => Some(p),
            _ => None,
        })
        .collect();

    let mut rows = ctx.rows.clone();
    let mut batch: Vec<(NodeObject, Vec<String>)> = Vec::new();
    for row in &mut rows {
        for np in &node_patterns {
            let mut properties = eval_pattern_props(exec, row, &np.properties)?;
            properties.retain(|_, v| !v.is_null());
            let node =
                NodeObject::with_properties(uuid::Uuid::new_v4().to_string(), properties);
            if let Some(var) = &np.variable {
                row.insert(var.clone(), Value::Node(Box::new(node.clone())));
            }
            batch.push((node, np.labels.clone()));
        }
    }
    create::batch_insert_nodes(exec, &batch)?;

    if !rel_patterns.is_empty() {
        for row in &mut rows {
            create::create_patterns_in_row(
                exec,
                row,
                &rel_patterns.iter().map(|p| (*p).clone()).collect::<Vec<_>>(),
            )?;
        }
    }

    let mut next = ctx.clone();
    for row in &rows {
        for pattern in &clause.patterns {
            for var in pattern.variables() {
                if let Some(v) = row.get(var) {
                    next.note(var, v);
                }
            }
        }
    }
    Ok(next.with_rows(rows))
}

// ============================================================================
// MATCH + WITH(COLLECT) pipelines
// ============================================================================

/// Claims `MATCH+ WITH(collect…) UNWIND RETURN`: the MATCH+COLLECT stage
/// runs as one SQL statement through the translator, then the collected
/// list expands in memory.
pub fn match_collect_unwind<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let Some((ctx, rest)) = collect_stage(exec, query, |rest| {
        matches!(rest, [Clause::Unwind(_), Clause::Return(_)])
    })?
    else {
        return Ok(None);
    };

    let mut ctx = ctx;
    for clause in rest {
        ctx = apply_clause(exec, ctx, clause)?;
    }
    Ok(Some(ctx.rows))
}

/// Claims `MATCH+ WITH(collect…) DELETE [RETURN?]`: the DELETE expression
/// (list indexing included) is evaluated against the collected list.
pub fn match_collect_delete<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let Some((ctx, rest)) = collect_stage(exec, query, |rest| {
        matches!(rest, [Clause::Delete(_)] | [Clause::Delete(_), Clause::Return(_)])
    })?
    else {
        return Ok(None);
    };

    let mut ctx = ctx;
    let mut returned = false;
    for clause in rest {
        returned = matches!(clause, Clause::Return(_));
        ctx = apply_clause(exec, ctx, clause)?;
    }
    Ok(Some(if returned { ctx.rows } else { Vec::new() }))
}

/// Shared front half of the MATCH+COLLECT strategies: checks the shape,
/// runs `MATCH… RETURN <with items>` through the translator, and returns
/// the resulting context plus the remaining clauses.
fn collect_stage<'q, S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &'q Query,
    tail_ok: impl Fn(&[Clause]) -> bool,
) -> Result<Option<(PhaseContext, &'q [Clause])>> {
    let mut matches = Vec::new();
    let mut i = 0;
    while let Some(Clause::Match(m)) = query.clauses.get(i) {
        matches.push(Clause::Match(m.clone()));
        i += 1;
    }
    if matches.is_empty() {
        return Ok(None);
    }
    let Some(Clause::With(with)) = query.clauses.get(i) else {
        return Ok(None);
    };
    let has_collect = with.items.iter().any(|item| {
        matches!(&item.expr, Expression::Function { name, .. } if name.eq_ignore_ascii_case("collect"))
    });
    if !has_collect
        || with.where_clause.is_some()
        || with.skip.is_some()
        || with.limit.is_some()
    {
        return Ok(None);
    }
    let rest = &query.clauses[i + 1..];
    if !tail_ok(rest) {
        return Ok(None);
    }

    let mut synthetic = matches;
    synthetic.push(Clause::Return(crate::cypher::ast::ProjectionClause {
        distinct: with.distinct,
        star: false,
        items: with.items.clone(),
        where_clause: None,
        order_by: with.order_by.clone(),
        skip: None,
        limit: None,
    }));
    let synthetic = Query { clauses: synthetic };
    let Some(translation) = translate::translate(&synthetic, exec.params())? else {
        return Ok(None);
    };

    let mut rows = Vec::new();
    for stmt in &translation.statements {
        let result = exec.sql(&stmt.sql, &stmt.params)?;
        rows.extend(result.rows.into_iter().map(format::deep_parse_row));
    }
    Ok(Some((PhaseContext::from_rows(rows), rest)))
}

// ============================================================================
// CREATE+RETURN / MERGE / bound relationship-list path
// ============================================================================

/// Claims `CREATE+ [RETURN?]` with no other clauses.
pub fn create_return<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let mut creates = 0;
    for clause in &query.clauses {
        match clause {
            Clause::Create(_) => creates += 1,
            Clause::Return(_) => {}
            _ => return Ok(None),
        }
    }
    if creates == 0 {
        return Ok(None);
    }
    run_clauses(exec, query).map(Some)
}

/// Claims `MATCH* MERGE+ SET* RETURN?` — the MERGE engine, covering ON
/// CREATE/ON MATCH SET, relationship merges and named merge paths.
pub fn merge_query<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let mut merges = 0;
    let mut seen_merge = false;
    for clause in &query.clauses {
        match clause {
            Clause::Match(_) | Clause::OptionalMatch(_) if !seen_merge => {}
            Clause::Merge(_) => {
                seen_merge = true;
                merges += 1;
            }
            Clause::Set(_) | Clause::Remove(_) if seen_merge => {}
            Clause::Return(_) if seen_merge => {}
            _ => return Ok(None),
        }
    }
    if merges == 0 {
        return Ok(None);
    }
    run_clauses(exec, query).map(Some)
}

/// Claims queries that re-match a bound relationship list:
/// `MATCH … WITH [r1,r2] AS rs MATCH (a)-[rs*]->(b) RETURN …`. The chain
/// is verified for continuity and only the endpoints are reconstructed.
pub fn bound_relationship_path<S: SqlStore>(
    exec: &Executor<'_, S>,
    query: &Query,
) -> Result<Option<Vec<Row>>> {
    let mut aliases: Vec<String> = Vec::new();
    let mut claimed = false;
    for clause in &query.clauses {
        match clause {
            Clause::With(w) => {
                for item in &w.items {
                    aliases.push(item.name());
                }
            }
            Clause::Match(m) => {
                for pattern in &m.patterns {
                    if let Pattern::Relationship(rp) = pattern {
                        if rp.edge.var_length {
                            match &rp.edge.variable {
                                Some(v) if aliases.contains(v) => claimed = true,
                                _ => return Ok(None),
                            }
                        }
                    }
                }
            }
            Clause::OptionalMatch(_)
            | Clause::Return(_)
            | Clause::Unwind(_) => {}
            _ => return Ok(None),
        }
    }
    if !claimed {
        return Ok(None);
    }
    run_clauses(exec, query).map(Some)
}

