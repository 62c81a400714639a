//! Scalar function registry: math, string, list, graph and temporal
//! functions, dispatched by (case-insensitive) name.

use uuid::Uuid;

use super::{eval_expr, EvalContext};
use crate::cypher::ast::{is_aggregate_function, Expression};
use crate::model::{Row, Value};
use crate::{Error, Result};

pub fn call_function(
    name: &str,
    args: &[Expression],
    _distinct: bool,
    row: &Row,
    cx: &EvalContext,
) -> Result<Value> {
    let lower = name.to_lowercase();

    // coalesce is lazy — evaluate arguments until one is non-null.
    if lower == "coalesce" {
        for arg in args {
            let v = eval_expr(arg, row, cx)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        return Ok(Value::Null);
    }

    // Aggregates are reduced over row sets by the engine. Reached on a
    // single row they degrade to their argument (count() to 1).
    if is_aggregate_function(&lower) {
        return match args.first() {
            Some(arg) => eval_expr(arg, row, cx),
            None => Ok(Value::Int(1)),
        };
    }

    if matches!(
        lower.as_str(),
        "datetime" | "localdatetime" | "date" | "time" | "localtime" | "duration" | "timestamp"
    ) {
        let vals: Vec<Value> = args.iter().map(|a| eval_expr(a, row, cx)).collect::<Result<_>>()?;
        return super::temporal::call(&lower, &vals);
    }

    let vals: Vec<Value> = args.iter().map(|a| eval_expr(a, row, cx)).collect::<Result<_>>()?;
    let arg0 = || -> Result<&Value> {
        vals.first()
            .ok_or_else(|| Error::EvaluationError(format!("{name}() requires an argument")))
    };

    match lower.as_str() {
        // ====================================================================
        // Graph functions
        // ====================================================================
        "id" => match arg0()? {
            Value::Node(n) => Ok(Value::String(n.id.clone())),
            Value::Edge(e) => Ok(Value::String(e.id.clone())),
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("id", "a node or relationship", other)),
        },

        "type" => match arg0()? {
            // Prefer the in-row capture; it survives deletion of the edge.
            Value::Edge(e) => match &e.rel_type {
                Some(t) => Ok(Value::String(t.clone())),
                None => edge_type_from_store(&e.id, cx),
            },
            Value::String(id) => edge_type_from_store(id, cx),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("type", "a relationship", other)),
        },

        "startnode" => match arg0()? {
            Value::Edge(e) => Ok(cx.source.entity_by_id(&e.source)?.unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("startNode", "a relationship", other)),
        },
        "endnode" => match arg0()? {
            Value::Edge(e) => Ok(cx.source.entity_by_id(&e.target)?.unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("endNode", "a relationship", other)),
        },

        "labels" => match arg0()? {
            Value::Node(n) => Ok(label_value(cx.source.labels_of(&n.id)?)),
            Value::String(id) => Ok(label_value(cx.source.labels_of(id)?)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("labels", "a node", other)),
        },

        "properties" => match arg0()? {
            Value::Node(n) => Ok(Value::Map(n.properties.clone())),
            Value::Edge(e) => Ok(Value::Map(e.properties.clone())),
            Value::Map(m) => Ok(Value::Map(m.clone())),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("properties", "a node, relationship or map", other)),
        },

        "keys" => match arg0()? {
            Value::Node(n) => Ok(string_list(n.properties.keys())),
            Value::Edge(e) => Ok(string_list(e.properties.keys())),
            Value::Map(m) => Ok(string_list(m.keys())),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("keys", "a node, relationship or map", other)),
        },

        "nodes" => match arg0()? {
            Value::Path(p) => Ok(Value::List(
                p.nodes.iter().map(|n| Value::Node(Box::new(n.clone()))).collect(),
            )),
            other => Err(arg_type_error("nodes", "a path", other)),
        },
        "relationships" => match arg0()? {
            Value::Path(p) => Ok(Value::List(
                p.edges.iter().map(|e| Value::Edge(Box::new(e.clone()))).collect(),
            )),
            other => Err(arg_type_error("relationships", "a path", other)),
        },

        "exists" => Ok(Value::Bool(!arg0()?.is_null())),

        // ====================================================================
        // List functions
        // ====================================================================
        "size" | "length" => match arg0()? {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(l) => Ok(Value::Int(l.len() as i64)),
            Value::Map(m) => Ok(Value::Int(m.len() as i64)),
            Value::Path(p) => Ok(Value::Int(p.len() as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error(&lower, "a string, list or path", other)),
        },
        "head" => match arg0()? {
            Value::List(l) => Ok(l.first().cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("head", "a list", other)),
        },
        "last" => match arg0()? {
            Value::List(l) => Ok(l.last().cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("last", "a list", other)),
        },
        "tail" => match arg0()? {
            Value::List(l) => Ok(Value::List(l.iter().skip(1).cloned().collect())),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("tail", "a list", other)),
        },
        "reverse" => match arg0()? {
            Value::List(l) => Ok(Value::List(l.iter().rev().cloned().collect())),
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("reverse", "a list or string", other)),
        },
        "range" => {
            let int_arg = |i: usize| -> Result<i64> {
                vals.get(i)
                    .and_then(|v| v.as_int())
                    .ok_or_else(|| {
                        Error::EvaluationError(format!(
                            "range() expects integer arguments, got {}",
                            vals.get(i).map(|v| v.type_name()).unwrap_or("nothing")
                        ))
                    })
            };
            let start = int_arg(0)?;
            let end = int_arg(1)?;
            let step = if vals.len() > 2 { int_arg(2)? } else { 1 };
            if step == 0 {
                return Err(Error::EvaluationError("range() step must not be zero".into()));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i <= end) || (step < 0 && i >= end) {
                out.push(Value::Int(i));
                i += step;
            }
            Ok(Value::List(out))
        }

        // ====================================================================
        // Conversions
        // ====================================================================
        "tointeger" | "toint" => match arg0()? {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) => Ok(Value::Int(*f as i64)),
            Value::String(s) => Ok(s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| s.trim().parse::<f64>().map(|f| Value::Int(f as i64)))
                .unwrap_or(Value::Null)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("toInteger", "a number or string", other)),
        },
        "tofloat" => match arg0()? {
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::String(s) => {
                Ok(s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null))
            }
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("toFloat", "a number or string", other)),
        },
        "tostring" => match arg0()? {
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(other.to_string())),
        },
        "toboolean" => match arg0()? {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => Ok(match s.to_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            }),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("toBoolean", "a boolean or string", other)),
        },

        // ====================================================================
        // Strings
        // ====================================================================
        "toupper" | "tolower" | "trim" => match arg0()? {
            Value::String(s) => Ok(Value::String(match lower.as_str() {
                "toupper" => s.to_uppercase(),
                "tolower" => s.to_lowercase(),
                _ => s.trim().to_string(),
            })),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error(&lower, "a string", other)),
        },
        "split" => match (arg0()?, vals.get(1)) {
            (Value::String(s), Some(Value::String(sep))) => Ok(Value::List(
                s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect(),
            )),
            (Value::Null, _) => Ok(Value::Null),
            _ => Err(Error::EvaluationError("split() expects two strings".into())),
        },
        "substring" => match (arg0()?, vals.get(1)) {
            (Value::String(s), Some(start)) => {
                let start = start.as_int().unwrap_or(0).max(0) as usize;
                let chars: Vec<char> = s.chars().collect();
                let end = match vals.get(2).and_then(|v| v.as_int()) {
                    Some(len) => (start + len.max(0) as usize).min(chars.len()),
                    None => chars.len(),
                };
                Ok(Value::String(chars[start.min(chars.len())..end].iter().collect()))
            }
            (Value::Null, _) => Ok(Value::Null),
            _ => Err(Error::EvaluationError("substring() expects a string and a start".into())),
        },
        "replace" => match (arg0()?, vals.get(1), vals.get(2)) {
            (Value::String(s), Some(Value::String(from)), Some(Value::String(to))) => {
                Ok(Value::String(s.replace(from.as_str(), to.as_str())))
            }
            (Value::Null, _, _) => Ok(Value::Null),
            _ => Err(Error::EvaluationError("replace() expects three strings".into())),
        },

        // ====================================================================
        // Math
        // ====================================================================
        "abs" => match arg0()? {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("abs", "a number", other)),
        },
        "sign" => match arg0()? {
            Value::Int(i) => Ok(Value::Int(i.signum())),
            Value::Float(f) => Ok(Value::Int(if *f > 0.0 {
                1
            } else if *f < 0.0 {
                -1
            } else {
                0
            })),
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error("sign", "a number", other)),
        },
        "ceil" | "floor" | "round" | "sqrt" => match arg0()? {
            v @ (Value::Int(_) | Value::Float(_)) => {
                let f = v.as_float().unwrap_or(0.0);
                Ok(match lower.as_str() {
                    "ceil" => Value::Float(f.ceil()),
                    "floor" => Value::Float(f.floor()),
                    "round" => Value::Float(f.round()),
                    _ => Value::Float(f.sqrt()),
                })
            }
            Value::Null => Ok(Value::Null),
            other => Err(arg_type_error(&lower, "a number", other)),
        },

        // ====================================================================
        // Randomness
        // ====================================================================
        "rand" => {
            // Derive a uniform float from fresh UUID entropy.
            let bytes = Uuid::new_v4().into_bytes();
            let x = u64::from_be_bytes(bytes[..8].try_into().unwrap_or([0; 8]));
            Ok(Value::Float((x >> 11) as f64 / (1u64 << 53) as f64))
        }
        "randomuuid" => Ok(Value::String(Uuid::new_v4().to_string())),

        _ => Err(Error::EvaluationError(format!("Unknown function: {name}"))),
    }
}

/// Single-label arrays normalize to the bare string.
pub fn label_value(labels: Vec<String>) -> Value {
    match labels.len() {
        1 => Value::String(labels.into_iter().next().unwrap_or_default()),
        _ => Value::List(labels.into_iter().map(Value::String).collect()),
    }
}

fn string_list<'a>(items: impl Iterator<Item = &'a String>) -> Value {
    Value::List(items.map(|s| Value::String(s.clone())).collect())
}

fn edge_type_from_store(id: &str, cx: &EvalContext) -> Result<Value> {
    match cx.source.entity_by_id(id)? {
        Some(Value::Edge(e)) => Ok(e.rel_type.map(Value::String).unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn arg_type_error(function: &str, expected: &str, got: &Value) -> Error {
    Error::EvaluationError(format!("{function}() expects {expected}, got {}", got.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NoEntities;

    fn call(q: &str) -> Result<Value> {
        let ast = crate::cypher::parse(&format!("RETURN {q}")).unwrap();
        let crate::cypher::ast::Clause::Return(ret) = &ast.clauses[0] else { unreachable!() };
        let params = Row::new();
        let cx = EvalContext { params: &params, source: &NoEntities };
        eval_expr(&ret.items[0].expr, &Row::new(), &cx)
    }

    #[test]
    fn range_produces_inclusive_list() {
        assert_eq!(
            call("range(1, 3)").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            call("range(3, 1, -1)").unwrap(),
            Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
        );
    }

    #[test]
    fn range_type_mismatch_is_an_error() {
        assert!(call("range('a', 3)").is_err());
    }

    #[test]
    fn head_last_tail() {
        assert_eq!(call("head([1,2,3])").unwrap(), Value::Int(1));
        assert_eq!(call("last([1,2,3])").unwrap(), Value::Int(3));
        assert_eq!(call("tail([1,2,3])").unwrap(), Value::List(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(call("head([])").unwrap(), Value::Null);
    }

    #[test]
    fn conversions() {
        assert_eq!(call("toInteger('42')").unwrap(), Value::Int(42));
        assert_eq!(call("toInteger('nope')").unwrap(), Value::Null);
        assert_eq!(call("toFloat(1)").unwrap(), Value::Float(1.0));
        assert_eq!(call("toString(42)").unwrap(), Value::String("42".into()));
        assert_eq!(call("toBoolean('TRUE')").unwrap(), Value::Bool(true));
    }

    #[test]
    fn coalesce_is_lazy_over_nulls() {
        assert_eq!(call("coalesce(null, null, 7)").unwrap(), Value::Int(7));
        assert_eq!(call("coalesce(null)").unwrap(), Value::Null);
    }

    #[test]
    fn string_helpers() {
        assert_eq!(call("toUpper('ab')").unwrap(), Value::String("AB".into()));
        assert_eq!(call("substring('hello', 1, 3)").unwrap(), Value::String("ell".into()));
        assert_eq!(
            call("split('a,b', ',')").unwrap(),
            Value::List(vec![Value::String("a".into()), Value::String("b".into())])
        );
    }

    #[test]
    fn rand_is_in_unit_interval() {
        for _ in 0..16 {
            let Value::Float(f) = call("rand()").unwrap() else { panic!("expected float") };
            assert!((0.0..1.0).contains(&f));
        }
    }
}
