//! Phase planning and semantic validation.
//!
//! The planner walks the clause stream once, tracking which aliases were
//! produced by aggregates or non-deterministic expressions, and cuts the
//! stream into sequential phases wherever a clause needs the previous
//! clauses' rows fully materialized before it can run.

use std::collections::{HashMap, HashSet};

use crate::cypher::ast::{Clause, Expression, Literal, Pattern, ProjectionClause, Query};
use crate::model::Row;
use crate::{Error, Result};

// ============================================================================
// Phase partitioning
// ============================================================================

/// Partition a query's clause indices into sequential phases.
pub fn plan_phases(query: &Query) -> Vec<Vec<usize>> {
    let mut phases: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    let mut aggregate_aliases: HashSet<String> = HashSet::new();
    let mut nondet_aliases: HashSet<String> = HashSet::new();
    let mut any_aggregate_with = false;
    let mut all_prior_matches_optional = true;

    for (i, clause) in query.clauses.iter().enumerate() {
        let prev = if i > 0 { Some(&query.clauses[i - 1]) } else { None };

        if boundary_before(
            clause,
            prev,
            &aggregate_aliases,
            &nondet_aliases,
            any_aggregate_with,
            all_prior_matches_optional,
        ) && !current.is_empty()
        {
            phases.push(std::mem::take(&mut current));
        }
        current.push(i);

        // Track state for later triggers.
        match clause {
            Clause::With(w) => {
                if w.has_aggregate() {
                    any_aggregate_with = true;
                }
                for item in &w.items {
                    let name = item.name();
                    if item.expr.contains_aggregate() {
                        aggregate_aliases.insert(name.clone());
                    }
                    if item.expr.contains_nondeterministic() {
                        nondet_aliases.insert(name);
                    }
                }
            }
            Clause::Unwind(u) => {
                if u.expr.contains_nondeterministic() {
                    nondet_aliases.insert(u.alias.clone());
                }
            }
            Clause::Match(_) => all_prior_matches_optional = false,
            _ => {}
        }
    }

    if !current.is_empty() {
        phases.push(current);
    }
    phases
}

/// Does any trigger require cutting a phase before this clause?
fn boundary_before(
    clause: &Clause,
    prev: Option<&Clause>,
    aggregate_aliases: &HashSet<String>,
    nondet_aliases: &HashSet<String>,
    any_aggregate_with: bool,
    all_prior_matches_optional: bool,
) -> bool {
    let references = |names: &HashSet<String>, expr: &Expression| {
        let mut vars = Vec::new();
        expr.collect_variables(&mut vars);
        vars.iter().any(|v| names.contains(v))
    };

    match clause {
        // Aggregate → consumer: UNWIND over an aggregate alias; likewise a
        // non-deterministic alias must be materialized before expansion.
        Clause::Unwind(u) => {
            references(aggregate_aliases, &u.expr) || references(nondet_aliases, &u.expr)
        }

        Clause::Match(_) => match prev {
            // Post-aggregate MATCH, and slicing WITH.
            Some(Clause::With(w)) => {
                any_aggregate_with || w.skip.is_some() || w.limit.is_some()
            }
            _ => false,
        },

        // OPTIONAL re-entry after a WITH when no unconditional MATCH has run.
        Clause::OptionalMatch(_) => {
            matches!(prev, Some(Clause::With(_))) && all_prior_matches_optional
        }

        Clause::With(w) => {
            // HAVING: previous WITH aggregated and filtered.
            let having = match prev {
                Some(Clause::With(pw)) => pw.has_aggregate() && pw.where_clause.is_some(),
                _ => false,
            };
            having || (!w.has_aggregate() && projection_references(w, nondet_aliases))
        }

        Clause::Return(r) => !r.has_aggregate() && projection_references(r, nondet_aliases),

        _ => false,
    }
}

fn projection_references(clause: &ProjectionClause, names: &HashSet<String>) -> bool {
    if names.is_empty() {
        return false;
    }
    clause.items.iter().any(|item| {
        let mut vars = Vec::new();
        item.expr.collect_variables(&mut vars);
        vars.iter().any(|v| names.contains(v))
    })
}

// ============================================================================
// Semantic validation
// ============================================================================

/// Validate variable scoping and MERGE constraints before execution.
pub fn validate(query: &Query, params: &Row) -> Result<()> {
    let mut defined: HashSet<String> = HashSet::new();

    for clause in &query.clauses {
        match clause {
            Clause::Match(m) | Clause::OptionalMatch(m) => {
                let mut scope = defined.clone();
                for pattern in &m.patterns {
                    for var in pattern.variables() {
                        scope.insert(var.to_string());
                    }
                    check_pattern_property_refs(pattern, &defined, "MATCH")?;
                }
                if let Some(cond) = &m.where_clause {
                    let mut vars = Vec::new();
                    cond.collect_variables(&mut vars);
                    require_defined(&vars, &scope, "WHERE")?;
                }
                defined = scope;
            }

            Clause::Create(c) => {
                for pattern in &c.patterns {
                    match pattern {
                        Pattern::Node(np) => {
                            if let Some(var) = &np.variable {
                                if defined.contains(var) {
                                    return Err(Error::SyntaxError(format!(
                                        "Variable `{var}` already declared"
                                    )));
                                }
                            }
                        }
                        Pattern::Relationship(rp) => {
                            if let Some(var) = &rp.edge.variable {
                                if defined.contains(var) {
                                    return Err(Error::SyntaxError(format!(
                                        "Variable `{var}` already declared"
                                    )));
                                }
                            }
                        }
                    }
                    check_pattern_property_refs(pattern, &defined, "CREATE")?;
                    for var in pattern.variables() {
                        defined.insert(var.to_string());
                    }
                }
            }

            Clause::Merge(m) => {
                for pattern in &m.patterns {
                    validate_merge_pattern(pattern, &defined, params)?;
                    for var in pattern.variables() {
                        defined.insert(var.to_string());
                    }
                }
                if let Some(path) = &m.path_variable {
                    defined.insert(path.clone());
                }
                for item in m.on_create.iter().chain(&m.on_match) {
                    if !defined.contains(&item.variable) {
                        return Err(Error::SyntaxError(format!(
                            "Undefined variable `{}` in SET",
                            item.variable
                        )));
                    }
                    if let Some(value) = &item.value {
                        let mut vars = Vec::new();
                        value.collect_variables(&mut vars);
                        require_defined(&vars, &defined, "SET")?;
                    }
                }
            }

            Clause::Set(s) => {
                for item in &s.items {
                    if !defined.contains(&item.variable) {
                        return Err(Error::SyntaxError(format!(
                            "Undefined variable `{}` in SET",
                            item.variable
                        )));
                    }
                    if let Some(value) = &item.value {
                        let mut vars = Vec::new();
                        value.collect_variables(&mut vars);
                        require_defined(&vars, &defined, "SET")?;
                    }
                }
            }

            Clause::Remove(r) => {
                for item in &r.items {
                    if !defined.contains(&item.variable) {
                        return Err(Error::SyntaxError(format!(
                            "Undefined variable `{}` in REMOVE",
                            item.variable
                        )));
                    }
                }
            }

            Clause::Delete(d) => {
                for target in &d.targets {
                    let mut vars = Vec::new();
                    target.collect_variables(&mut vars);
                    require_defined(&vars, &defined, "DELETE")?;
                }
            }

            Clause::With(w) => {
                defined = validate_projection(w, &defined, true)?;
            }

            Clause::Unwind(u) => {
                let mut vars = Vec::new();
                u.expr.collect_variables(&mut vars);
                require_defined(&vars, &defined, "UNWIND")?;
                defined.insert(u.alias.clone());
            }

            Clause::Return(r) => {
                validate_projection(r, &defined, false)?;
            }

            // No execution strategy claims these; scoping is not enforced.
            Clause::Call(_) | Clause::Union(_) => {}
        }
    }

    Ok(())
}

fn validate_projection(
    clause: &ProjectionClause,
    defined: &HashSet<String>,
    rebind: bool,
) -> Result<HashSet<String>> {
    for item in &clause.items {
        let mut vars = Vec::new();
        item.expr.collect_variables(&mut vars);
        require_defined(&vars, defined, "projection")?;
    }

    let mut out: HashSet<String> = if clause.star { defined.clone() } else { HashSet::new() };
    for item in &clause.items {
        out.insert(item.name());
    }

    let order_scope: HashSet<String> = defined.union(&out).cloned().collect();
    for order in &clause.order_by {
        let mut vars = Vec::new();
        order.expr.collect_variables(&mut vars);
        require_defined(&vars, &order_scope, "ORDER BY")?;
    }

    if let Some(cond) = &clause.where_clause {
        let scope: HashSet<String> = defined.union(&out).cloned().collect();
        let mut vars = Vec::new();
        cond.collect_variables(&mut vars);
        require_defined(&vars, &scope, "WHERE")?;
    }

    Ok(if rebind { out } else { defined.clone() })
}

fn validate_merge_pattern(
    pattern: &Pattern,
    defined: &HashSet<String>,
    params: &Row,
) -> Result<()> {
    let check_props = |props: &indexmap::IndexMap<String, Expression>| -> Result<()> {
        for (key, value) in props {
            // An explicit null can never match (`null = null` is undefined),
            // so reject it statically. A parameter that resolves to null is
            // rejected the same way; a *variable* that evaluates to null is
            // allowed and treated as a no-op match at runtime.
            match value {
                Expression::Literal(Literal::Null) => {
                    return Err(Error::ConstraintViolation(format!(
                        "Cannot merge on null property `{key}`"
                    )));
                }
                Expression::Parameter(name) => {
                    if params.get(name).map(|v| v.is_null()).unwrap_or(true) {
                        return Err(Error::ConstraintViolation(format!(
                            "Cannot merge on null property `{key}`"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    };

    match pattern {
        Pattern::Node(np) => {
            if let Some(var) = &np.variable {
                if defined.contains(var) {
                    return Err(Error::SyntaxError(format!(
                        "MERGE cannot re-bind variable `{var}`"
                    )));
                }
            }
            check_props(&np.properties)?;
        }
        Pattern::Relationship(rp) => {
            for endpoint in [&rp.source, &rp.target] {
                if let Some(var) = &endpoint.variable {
                    if defined.contains(var)
                        && (!endpoint.labels.is_empty() || !endpoint.properties.is_empty())
                    {
                        return Err(Error::SyntaxError(format!(
                            "MERGE cannot add labels or properties to bound variable `{var}`"
                        )));
                    }
                }
                check_props(&endpoint.properties)?;
            }
            if let Some(var) = &rp.edge.variable {
                if defined.contains(var) {
                    return Err(Error::SyntaxError(format!(
                        "MERGE cannot re-bind variable `{var}`"
                    )));
                }
            }
            check_props(&rp.edge.properties)?;
        }
    }
    Ok(())
}

fn check_pattern_property_refs(
    pattern: &Pattern,
    defined: &HashSet<String>,
    context: &str,
) -> Result<()> {
    let props = |p: &indexmap::IndexMap<String, Expression>| -> Vec<String> {
        let mut vars = Vec::new();
        for value in p.values() {
            value.collect_variables(&mut vars);
        }
        vars
    };
    let vars = match pattern {
        Pattern::Node(np) => props(&np.properties),
        Pattern::Relationship(rp) => {
            let mut vars = props(&rp.source.properties);
            vars.extend(props(&rp.edge.properties));
            vars.extend(props(&rp.target.properties));
            vars
        }
    };
    require_defined(&vars, defined, context)
}

fn require_defined(vars: &[String], defined: &HashSet<String>, context: &str) -> Result<()> {
    for var in vars {
        if !defined.contains(var) {
            return Err(Error::SyntaxError(format!(
                "Undefined variable `{var}` in {context}"
            )));
        }
    }
    Ok(())
}

/// Aliases produced by WITH clauses, split by how downstream clauses must
/// treat them. Used by the dispatcher's strategy claims.
#[derive(Debug, Default)]
pub struct AliasInfo {
    pub aggregate: HashSet<String>,
    /// alias → the property expression it stands for
    pub property: HashMap<String, Expression>,
}

pub fn collect_alias_info(query: &Query) -> AliasInfo {
    let mut info = AliasInfo::default();
    for clause in &query.clauses {
        if let Clause::With(w) = clause {
            for item in &w.items {
                let name = item.name();
                if item.expr.contains_aggregate() {
                    info.aggregate.insert(name);
                } else if matches!(item.expr, Expression::Property { .. }) {
                    info.property.insert(name, item.expr.clone());
                }
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher;

    fn phases(q: &str) -> Vec<Vec<usize>> {
        plan_phases(&cypher::parse(q).unwrap())
    }

    #[test]
    fn single_phase_for_simple_query() {
        assert_eq!(phases("MATCH (n) RETURN n").len(), 1);
    }

    #[test]
    fn aggregate_then_unwind_splits() {
        let p = phases("MATCH (n) WITH collect(n) AS ns UNWIND ns AS x RETURN x");
        assert_eq!(p.len(), 2);
        assert_eq!(p[0], vec![0, 1]);
        assert_eq!(p[1], vec![2, 3]);
    }

    #[test]
    fn post_aggregate_match_splits() {
        let p = phases("MATCH (n) WITH count(n) AS c MATCH (m) RETURN m, c");
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn slicing_with_splits_before_match() {
        let p = phases("MATCH (n) WITH n LIMIT 2 MATCH (m) RETURN n, m");
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn having_splits() {
        let p = phases(
            "MATCH (n) WITH n.city AS city, count(n) AS c WHERE c > 1 WITH city RETURN city",
        );
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn validation_rejects_undefined_variable() {
        let q = cypher::parse("MATCH (n) RETURN m").unwrap();
        assert!(matches!(validate(&q, &Row::new()), Err(Error::SyntaxError(_))));
    }

    #[test]
    fn validation_rejects_merge_rebinding() {
        let q = cypher::parse("MATCH (n:A) MERGE (n:B)").unwrap();
        assert!(matches!(validate(&q, &Row::new()), Err(Error::SyntaxError(_))));
    }

    #[test]
    fn merge_endpoint_reuse_is_allowed() {
        let q = cypher::parse("MATCH (a:A) MERGE (a)-[:R]->(b:B)").unwrap();
        assert!(validate(&q, &Row::new()).is_ok());
    }

    #[test]
    fn merge_null_property_is_rejected() {
        let q = cypher::parse("MERGE (n:N {k: null})").unwrap();
        assert!(matches!(validate(&q, &Row::new()), Err(Error::ConstraintViolation(_))));
    }

    #[test]
    fn merge_null_parameter_is_rejected() {
        let q = cypher::parse("MERGE (n:N {k: $v})").unwrap();
        let mut params = Row::new();
        params.insert("v".into(), crate::model::Value::Null);
        assert!(matches!(validate(&q, &params), Err(Error::ConstraintViolation(_))));
    }
}
