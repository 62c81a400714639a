//! Expression evaluator.
//!
//! Evaluates a single [`Expression`] against a [`Row`] plus a parameter map.
//! Aggregate functions are deliberately not reduced here — they are
//! dispatched over row sets by the engine; when one reaches the single-row
//! evaluator it degrades to evaluating its argument.
//!
//! Null handling is two-valued: a comparison involving null is `false`, as
//! is `<>` with a null operand. This is a documented deviation from
//! Cypher's ternary logic.

pub mod functions;
pub mod temporal;

use crate::cypher::ast::{
    BinaryOp, ComparisonOp, Expression, ListPredicate, ListPredicateKind, Literal, UnaryOp,
    WhereCondition,
};
use crate::model::{Row, Value, ID_KEY, END_KEY, START_KEY, TYPE_KEY};
use crate::{Error, Result};

/// Storage-side lookups the evaluator may need: raw-id property access and
/// label resolution. Implemented by the engine's executor with a per-query
/// cache behind it.
pub trait EntitySource {
    /// Entity by opaque id — nodes first, then edges.
    fn entity_by_id(&self, id: &str) -> Result<Option<Value>>;
    /// Labels of a node id (empty when unknown).
    fn labels_of(&self, id: &str) -> Result<Vec<String>>;
}

/// An [`EntitySource`] with nothing behind it, for contexts with no storage.
pub struct NoEntities;

impl EntitySource for NoEntities {
    fn entity_by_id(&self, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }
    fn labels_of(&self, _id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Everything an expression needs besides the row itself.
pub struct EvalContext<'a> {
    pub params: &'a Row,
    pub source: &'a dyn EntitySource,
}

/// Evaluate an expression against a row.
pub fn eval_expr(expr: &Expression, row: &Row, cx: &EvalContext) -> Result<Value> {
    match expr {
        Expression::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::String(s) => Value::String(s.clone()),
        }),

        Expression::Parameter(name) => cx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EvaluationError(format!("Missing parameter: ${name}"))),

        // The row binding is authoritative; an absent binding reads as null.
        Expression::Variable(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),

        Expression::Property { variable, key } => {
            let value = row.get(variable).cloned().unwrap_or(Value::Null);
            property_of_value(&value, key, cx)
        }

        Expression::PropertyAccess { base, key } => {
            let value = eval_expr(base, row, cx)?;
            property_of_value(&value, key, cx)
        }

        Expression::IndexAccess { base, index } => {
            let value = eval_expr(base, row, cx)?;
            let idx = eval_expr(index, row, cx)?;
            Ok(index_value(&value, &idx))
        }

        Expression::List(items) => {
            let vals: Vec<Value> =
                items.iter().map(|e| eval_expr(e, row, cx)).collect::<Result<_>>()?;
            Ok(Value::List(vals))
        }

        Expression::Object(entries) => {
            let mut map = indexmap::IndexMap::new();
            for (k, v) in entries {
                map.insert(k.clone(), eval_expr(v, row, cx)?);
            }
            Ok(Value::Map(map))
        }

        Expression::Unary { op, operand } => {
            let value = eval_expr(operand, row, cx)?;
            match op {
                UnaryOp::Not => match value {
                    Value::Null => Ok(Value::Null),
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Ok(Value::Bool(!other.is_truthy())),
                },
                UnaryOp::Minus => match value {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::EvaluationError(format!(
                        "Cannot negate {}",
                        other.type_name()
                    ))),
                },
                UnaryOp::IsNull => Ok(Value::Bool(value.is_null())),
                UnaryOp::IsNotNull => Ok(Value::Bool(!value.is_null())),
            }
        }

        Expression::Binary { op, left, right } => {
            // Short-circuit the logical operators.
            match op {
                BinaryOp::And => {
                    let lv = eval_expr(left, row, cx)?;
                    if !lv.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    let rv = eval_expr(right, row, cx)?;
                    return Ok(Value::Bool(rv.is_truthy()));
                }
                BinaryOp::Or => {
                    let lv = eval_expr(left, row, cx)?;
                    if lv.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    let rv = eval_expr(right, row, cx)?;
                    return Ok(Value::Bool(rv.is_truthy()));
                }
                _ => {}
            }
            let lv = eval_expr(left, row, cx)?;
            let rv = eval_expr(right, row, cx)?;
            eval_binary_op(&lv, *op, &rv)
        }

        Expression::Comparison { op, left, right } => {
            let lv = eval_expr(left, row, cx)?;
            let rv = eval_expr(right, row, cx)?;
            eval_comparison(&lv, *op, &rv)
        }

        Expression::Function { name, args, distinct } => {
            functions::call_function(name, args, *distinct, row, cx)
        }

        Expression::Case { whens, else_branch } => {
            for when in whens {
                if eval_condition(&when.condition, row, cx)? {
                    return eval_expr(&when.result, row, cx);
                }
            }
            match else_branch {
                Some(e) => eval_expr(e, row, cx),
                None => Ok(Value::Null),
            }
        }

        Expression::ListComprehension { variable, list, filter, projection } => {
            let source = eval_expr(list, row, cx)?;
            let items = match source {
                Value::Null => return Ok(Value::Null),
                Value::List(items) => items,
                other => {
                    return Err(Error::EvaluationError(format!(
                        "List comprehension over {}",
                        other.type_name()
                    )));
                }
            };
            let mut out = Vec::new();
            // The binder shadows in a cloned row; the outer row is untouched.
            let mut scope = row.clone();
            for item in items {
                scope.insert(variable.clone(), item.clone());
                if let Some(cond) = filter {
                    if !eval_condition(cond, &scope, cx)? {
                        continue;
                    }
                }
                match projection {
                    Some(proj) => out.push(eval_expr(proj, &scope, cx)?),
                    None => out.push(item),
                }
            }
            Ok(Value::List(out))
        }

        Expression::ListPredicate(pred) => eval_list_predicate(pred, row, cx).map(Value::Bool),

        Expression::LabelPredicate { variable, labels } => {
            let value = row.get(variable).cloned().unwrap_or(Value::Null);
            match value {
                Value::Node(node) => {
                    let have = cx.source.labels_of(&node.id)?;
                    Ok(Value::Bool(labels.iter().all(|l| have.contains(l))))
                }
                _ => Ok(Value::Bool(false)),
            }
        }
    }
}

/// Evaluate a condition to a boolean under the two-valued policy.
pub fn eval_condition(cond: &WhereCondition, row: &Row, cx: &EvalContext) -> Result<bool> {
    match cond {
        WhereCondition::Comparison { op, left, right } => {
            let lv = eval_expr(left, row, cx)?;
            let rv = eval_expr(right, row, cx)?;
            Ok(eval_comparison(&lv, *op, &rv)?.is_truthy())
        }
        WhereCondition::And(a, b) => Ok(eval_condition(a, row, cx)? && eval_condition(b, row, cx)?),
        WhereCondition::Or(a, b) => Ok(eval_condition(a, row, cx)? || eval_condition(b, row, cx)?),
        WhereCondition::Not(inner) => Ok(!eval_condition(inner, row, cx)?),
        WhereCondition::Expression(e) => Ok(eval_expr(e, row, cx)?.is_truthy()),
        WhereCondition::ListPredicate(pred) => eval_list_predicate(pred, row, cx),
    }
}

fn eval_list_predicate(pred: &ListPredicate, row: &Row, cx: &EvalContext) -> Result<bool> {
    let source = eval_expr(&pred.list, row, cx)?;
    let items = match source {
        Value::List(items) => items,
        Value::Null => return Ok(false),
        other => {
            return Err(Error::EvaluationError(format!(
                "{:?} predicate over {}",
                pred.kind,
                other.type_name()
            )));
        }
    };
    let len = items.len();
    let mut matches = 0usize;
    let mut scope = row.clone();
    for item in items {
        scope.insert(pred.variable.clone(), item);
        if eval_condition(&pred.condition, &scope, cx)? {
            matches += 1;
        }
    }
    Ok(match pred.kind {
        ListPredicateKind::All => matches == len,
        ListPredicateKind::Any => matches > 0,
        ListPredicateKind::None => matches == 0,
        ListPredicateKind::Single => matches == 1,
    })
}

// ============================================================================
// Property access
// ============================================================================

/// Property lookup on an arbitrary value.
///
/// In-row maps and entities answer directly. A string either parses as a
/// JSON object (answering from the parsed map) or is taken as a raw entity
/// id and resolved against storage — nodes first, then edges. Unknown paths
/// are null, never an error.
pub fn property_of_value(value: &Value, key: &str, cx: &EvalContext) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Node(node) => {
            if key == ID_KEY {
                return Ok(Value::String(node.id.clone()));
            }
            Ok(node.properties.get(key).cloned().unwrap_or(Value::Null))
        }
        Value::Edge(edge) => match key {
            ID_KEY => Ok(Value::String(edge.id.clone())),
            START_KEY => Ok(Value::String(edge.source.clone())),
            END_KEY => Ok(Value::String(edge.target.clone())),
            TYPE_KEY => Ok(edge.rel_type.clone().map(Value::String).unwrap_or(Value::Null)),
            _ => Ok(edge.properties.get(key).cloned().unwrap_or(Value::Null)),
        },
        Value::Map(map) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        Value::String(s) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(s) {
                if json.is_object() {
                    return property_of_value(&Value::from_json(&json), key, cx);
                }
            }
            match cx.source.entity_by_id(s)? {
                Some(entity) => property_of_value(&entity, key, cx),
                None => Ok(Value::Null),
            }
        }
        _ => Ok(Value::Null),
    }
}

fn index_value(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::List(items), idx) => match idx.as_int() {
            Some(i) => {
                let len = items.len() as i64;
                let pos = if i < 0 { len + i } else { i };
                if pos >= 0 && pos < len {
                    items[pos as usize].clone()
                } else {
                    Value::Null
                }
            }
            None => Value::Null,
        },
        (Value::Map(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

// ============================================================================
// Operators
// ============================================================================

fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    // `+` concatenates when either side is a list, promoting the scalar side
    // to a one-element list.
    if op == BinaryOp::Add {
        match (left, right) {
            (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                return Ok(Value::List(out));
            }
            (Value::List(a), b) => {
                let mut out = a.clone();
                out.push(b.clone());
                return Ok(Value::List(out));
            }
            (a, Value::List(b)) => {
                let mut out = vec![a.clone()];
                out.extend(b.iter().cloned());
                return Ok(Value::List(out));
            }
            (Value::String(a), Value::String(b)) => {
                return Ok(Value::String(format!("{a}{b}")));
            }
            _ => {}
        }
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Add => numeric_op(left, right, |a, b| a.checked_add(b), |a, b| a + b),
        BinaryOp::Subtract => numeric_op(left, right, |a, b| a.checked_sub(b), |a, b| a - b),
        BinaryOp::Multiply => numeric_op(left, right, |a, b| a.checked_mul(b), |a, b| a * b),
        BinaryOp::Divide => match right {
            Value::Int(0) => Err(Error::EvaluationError("Division by zero".into())),
            Value::Float(f) if *f == 0.0 => {
                Err(Error::EvaluationError("Division by zero".into()))
            }
            _ => numeric_op(left, right, |a, b| a.checked_div(b), |a, b| a / b),
        },
        BinaryOp::Modulo => match right {
            Value::Int(0) => Err(Error::EvaluationError("Division by zero".into())),
            _ => numeric_op(left, right, |a, b| a.checked_rem(b), |a, b| a % b),
        },
        BinaryOp::Power => {
            let (Some(l), Some(r)) = (left.as_float(), right.as_float()) else {
                return Err(numeric_type_error(left, right));
            };
            Ok(Value::Float(l.powf(r)))
        }
        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        BinaryOp::Xor => Ok(Value::Bool(left.is_truthy() ^ right.is_truthy())),
    }
}

fn numeric_op(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => match int_op(*a, *b) {
            Some(v) => Ok(Value::Int(v)),
            None => Ok(Value::Float(float_op(*a as f64, *b as f64))),
        },
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(numeric_type_error(left, right)),
    }
}

fn numeric_type_error(left: &Value, right: &Value) -> Error {
    Error::EvaluationError(format!(
        "Expected numeric operands, got {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

/// Comparisons are two-valued: any comparison with null — including `<>` —
/// is false.
fn eval_comparison(left: &Value, op: ComparisonOp, right: &Value) -> Result<Value> {
    use std::cmp::Ordering;

    if left.is_null() || right.is_null() {
        return Ok(Value::Bool(false));
    }

    match op {
        ComparisonOp::Eq => Ok(Value::Bool(left == right)),
        ComparisonOp::Neq => Ok(Value::Bool(left != right)),
        ComparisonOp::Lt => Ok(Value::Bool(left.cypher_cmp(right) == Some(Ordering::Less))),
        ComparisonOp::Lte => Ok(Value::Bool(matches!(
            left.cypher_cmp(right),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        ComparisonOp::Gt => Ok(Value::Bool(left.cypher_cmp(right) == Some(Ordering::Greater))),
        ComparisonOp::Gte => Ok(Value::Bool(matches!(
            left.cypher_cmp(right),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        ComparisonOp::In => match right {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|v| v == left))),
            _ => Ok(Value::Bool(false)),
        },
        ComparisonOp::StartsWith => Ok(Value::Bool(match (left, right) {
            (Value::String(a), Value::String(b)) => a.starts_with(b.as_str()),
            _ => false,
        })),
        ComparisonOp::EndsWith => Ok(Value::Bool(match (left, right) {
            (Value::String(a), Value::String(b)) => a.ends_with(b.as_str()),
            _ => false,
        })),
        ComparisonOp::Contains => Ok(Value::Bool(match (left, right) {
            (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
            _ => false,
        })),
        ComparisonOp::Matches => {
            Err(Error::EvaluationError("Regex matching is not supported".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher;
    use crate::cypher::ast::Clause;

    fn eval_return_expr(query: &str, row: &Row) -> Result<Value> {
        let ast = cypher::parse(query).unwrap();
        let Clause::Return(ret) = &ast.clauses[ast.clauses.len() - 1] else {
            panic!("expected RETURN");
        };
        let params = Row::new();
        let cx = EvalContext { params: &params, source: &NoEntities };
        eval_expr(&ret.items[0].expr, row, &cx)
    }

    #[test]
    fn arithmetic_and_precedence() {
        let row = Row::new();
        assert_eq!(eval_return_expr("RETURN 2 + 3 * 4", &row).unwrap(), Value::Int(14));
        assert_eq!(eval_return_expr("RETURN (2 + 3) * 4", &row).unwrap(), Value::Int(20));
        assert_eq!(eval_return_expr("RETURN 7 % 4", &row).unwrap(), Value::Int(3));
    }

    #[test]
    fn plus_promotes_scalars_to_lists() {
        let row = Row::new();
        assert_eq!(
            eval_return_expr("RETURN [1,2] + 3", &row).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            eval_return_expr("RETURN 0 + [1]", &row).unwrap(),
            Value::List(vec![Value::Int(0), Value::Int(1)])
        );
    }

    #[test]
    fn null_comparisons_are_false() {
        let row = Row::new();
        assert_eq!(eval_return_expr("RETURN null = null", &row).unwrap(), Value::Bool(false));
        assert_eq!(eval_return_expr("RETURN null <> 1", &row).unwrap(), Value::Bool(false));
        assert_eq!(eval_return_expr("RETURN 1 < null", &row).unwrap(), Value::Bool(false));
    }

    #[test]
    fn list_comprehension_filters_and_maps() {
        let row = Row::new();
        assert_eq!(
            eval_return_expr("RETURN [x IN [1,2,3] WHERE x > 1 | x * 10]", &row).unwrap(),
            Value::List(vec![Value::Int(20), Value::Int(30)])
        );
    }

    #[test]
    fn list_predicates() {
        let row = Row::new();
        for (q, expected) in [
            ("RETURN all(x IN [1,2,3] WHERE x > 0)", true),
            ("RETURN any(x IN [1,2,3] WHERE x > 2)", true),
            ("RETURN none(x IN [1,2,3] WHERE x > 3)", true),
            ("RETURN single(x IN [1,2,3] WHERE x = 2)", true),
            ("RETURN single(x IN [2,2] WHERE x = 2)", false),
        ] {
            assert_eq!(eval_return_expr(q, &row).unwrap(), Value::Bool(expected), "{q}");
        }
    }

    #[test]
    fn case_branches() {
        let row = Row::new();
        assert_eq!(
            eval_return_expr("RETURN CASE WHEN 1 > 2 THEN 'a' WHEN 2 > 1 THEN 'b' END", &row)
                .unwrap(),
            Value::String("b".into())
        );
        assert_eq!(
            eval_return_expr("RETURN CASE WHEN false THEN 'a' END", &row).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn negative_index_counts_from_end() {
        let row = Row::new();
        assert_eq!(eval_return_expr("RETURN [1,2,3][-1]", &row).unwrap(), Value::Int(3));
        assert_eq!(eval_return_expr("RETURN [1,2,3][5]", &row).unwrap(), Value::Null);
    }
}
