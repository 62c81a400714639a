//! Universal value type for rows, parameters and results.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;

use super::graph::{EdgeObject, NodeObject, PathObject, END_KEY, ID_KEY, START_KEY, TYPE_KEY};

/// A row value.
///
/// Covers scalars, containers, graph entities and temporal values. Entities
/// are canonical: property map plus reserved ids, regardless of whether the
/// value came from storage or from in-memory construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),

    // Graph entities
    Node(Box<NodeObject>),
    Edge(Box<EdgeObject>),
    Path(Box<PathObject>),

    // Temporal
    Date(NaiveDate),
    Time { time: NaiveTime, offset: FixedOffset },
    LocalTime(NaiveTime),
    DateTime { instant: DateTime<FixedOffset>, zone: Option<String> },
    LocalDateTime(NaiveDateTime),
    Duration(IsoDuration),
}

/// ISO 8601 duration kept in its four carrier components.
///
/// Hours are never normalized into days and months never into years, so a
/// duration built from `{hours: 30}` renders as `PT30H`, not `P1DT6H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Edge(_) => "RELATIONSHIP",
            Value::Path(_) => "PATH",
            Value::Date(_) => "DATE",
            Value::Time { .. } => "TIME",
            Value::LocalTime(_) => "LOCAL_TIME",
            Value::DateTime { .. } => "DATETIME",
            Value::LocalDateTime(_) => "LOCAL_DATETIME",
            Value::Duration(_) => "DURATION",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Predicate truthiness: null is false, everything non-bool is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The entity id, when the value is a node or an edge.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Value::Node(n) => Some(&n.id),
            Value::Edge(e) => Some(&e.id),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// JSON conversion
// ============================================================================

impl Value {
    /// Encode for the storage layer and the caller boundary. Entities become
    /// maps carrying their reserved keys; temporal values become ISO 8601
    /// strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(m) => {
                let mut out = serde_json::Map::new();
                for (k, v) in m {
                    out.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(out)
            }
            Value::Node(n) => {
                let mut out = serde_json::Map::new();
                for (k, v) in &n.properties {
                    out.insert(k.clone(), v.to_json());
                }
                out.insert(ID_KEY.into(), serde_json::Value::String(n.id.clone()));
                serde_json::Value::Object(out)
            }
            Value::Edge(e) => {
                let mut out = serde_json::Map::new();
                for (k, v) in &e.properties {
                    out.insert(k.clone(), v.to_json());
                }
                out.insert(ID_KEY.into(), serde_json::Value::String(e.id.clone()));
                out.insert(START_KEY.into(), serde_json::Value::String(e.source.clone()));
                out.insert(END_KEY.into(), serde_json::Value::String(e.target.clone()));
                if let Some(t) = &e.rel_type {
                    out.insert(TYPE_KEY.into(), serde_json::Value::String(t.clone()));
                }
                serde_json::Value::Object(out)
            }
            Value::Path(p) => {
                let mut out = Vec::with_capacity(p.nodes.len() + p.edges.len());
                for (i, node) in p.nodes.iter().enumerate() {
                    out.push(Value::Node(Box::new(node.clone())).to_json());
                    if let Some(edge) = p.edges.get(i) {
                        out.push(Value::Edge(Box::new(edge.clone())).to_json());
                    }
                }
                serde_json::Value::Array(out)
            }
            temporal => serde_json::Value::String(temporal.temporal_string().unwrap_or_default()),
        }
    }

    /// Decode a JSON value, reassembling entities from their reserved keys.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                let id = obj.get(ID_KEY).and_then(|v| v.as_str());
                let mut props = IndexMap::new();
                for (k, v) in obj {
                    if k == ID_KEY || k == START_KEY || k == END_KEY || k == TYPE_KEY {
                        continue;
                    }
                    props.insert(k.clone(), Value::from_json(v));
                }
                match id {
                    Some(id) => {
                        let start = obj.get(START_KEY).and_then(|v| v.as_str());
                        let end = obj.get(END_KEY).and_then(|v| v.as_str());
                        match (start, end) {
                            (Some(start), Some(end)) => Value::Edge(Box::new(EdgeObject {
                                id: id.to_owned(),
                                source: start.to_owned(),
                                target: end.to_owned(),
                                rel_type: obj
                                    .get(TYPE_KEY)
                                    .and_then(|v| v.as_str())
                                    .map(str::to_owned),
                                properties: props,
                            })),
                            _ => Value::Node(Box::new(NodeObject {
                                id: id.to_owned(),
                                properties: props,
                            })),
                        }
                    }
                    None => Value::Map(props),
                }
            }
        }
    }

    /// ISO 8601 rendering for temporal variants; `None` for everything else.
    pub fn temporal_string(&self) -> Option<String> {
        match self {
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::LocalTime(t) => Some(format_naive_time(t)),
            Value::Time { time, offset } => {
                Some(format!("{}{}", format_naive_time(time), format_offset(offset)))
            }
            Value::LocalDateTime(dt) => {
                Some(format!("{}T{}", dt.date().format("%Y-%m-%d"), format_naive_time(&dt.time())))
            }
            Value::DateTime { instant, zone } => {
                let base = format!(
                    "{}T{}{}",
                    instant.date_naive().format("%Y-%m-%d"),
                    format_naive_time(&instant.time()),
                    format_offset(instant.offset()),
                );
                Some(match zone {
                    Some(name) => format!("{base}[{name}]"),
                    None => base,
                })
            }
            Value::Duration(d) => Some(d.to_string()),
            _ => None,
        }
    }
}

fn format_naive_time(t: &NaiveTime) -> String {
    use chrono::Timelike;
    let nanos = t.nanosecond();
    if nanos == 0 {
        t.format("%H:%M:%S").to_string()
    } else {
        let mut frac = format!("{nanos:09}");
        while frac.ends_with('0') {
            frac.pop();
        }
        format!("{}.{}", t.format("%H:%M:%S"), frac)
    }
}

fn format_offset(offset: &FixedOffset) -> String {
    let total = offset.local_minus_utc();
    if total == 0 {
        return "Z".into();
    }
    let sign = if total < 0 { '-' } else { '+' };
    let total = total.abs();
    format!("{}{:02}:{:02}", sign, total / 3600, (total % 3600) / 60)
}

// ============================================================================
// Comparison
// ============================================================================

impl Value {
    /// Predicate comparison. Returns `None` when either side is null or the
    /// types are incomparable; the evaluator maps that to false (two-valued
    /// approximation of Cypher's ternary logic).
    pub fn cypher_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::LocalTime(a), Value::LocalTime(b)) => a.partial_cmp(b),
            (Value::LocalDateTime(a), Value::LocalDateTime(b)) => a.partial_cmp(b),
            (Value::DateTime { instant: a, .. }, Value::DateTime { instant: b, .. }) => {
                a.partial_cmp(b)
            }
            _ => None,
        }
    }

    /// Total ordering for ORDER BY: null sorts first, numbers by value,
    /// strings lexicographically, booleans false before true, and mixed
    /// types fall back to their string form.
    pub fn order_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => match self.cypher_cmp(other) {
                Some(ord) => ord,
                None => self.order_string().cmp(&other.order_string()),
            },
        }
    }

    /// Deterministic string form used for mixed-type ordering and as the
    /// DISTINCT fallback key.
    pub fn order_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.months == 0 && self.days == 0 && self.seconds == 0 && self.nanoseconds == 0 {
            return write!(f, "PT0S");
        }
        write!(f, "P")?;
        if self.months != 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.days != 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.seconds != 0 || self.nanoseconds != 0 {
            write!(f, "T")?;
            let hours = self.seconds / 3600;
            let minutes = (self.seconds % 3600) / 60;
            let secs = self.seconds % 60;
            if hours != 0 {
                write!(f, "{hours}H")?;
            }
            if minutes != 0 {
                write!(f, "{minutes}M")?;
            }
            if self.nanoseconds != 0 {
                let mut frac = format!("{:09}", self.nanoseconds.unsigned_abs());
                while frac.ends_with('0') {
                    frac.pop();
                }
                write!(f, "{secs}.{frac}S")?;
            } else if secs != 0 || (hours == 0 && minutes == 0) {
                write!(f, "{secs}S")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(2.5), Value::Float(2.5));
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn null_comparison_is_undefined() {
        assert_eq!(Value::Null.cypher_cmp(&Value::Null), None);
        assert_eq!(Value::Null.cypher_cmp(&Value::Int(1)), None);
    }

    #[test]
    fn cross_numeric_comparison() {
        assert_eq!(Value::Int(1).cypher_cmp(&Value::Float(1.5)), Some(Ordering::Less));
    }

    #[test]
    fn order_puts_null_first() {
        assert_eq!(Value::Null.order_cmp(&Value::Int(-100)), Ordering::Less);
        assert_eq!(Value::Bool(false).order_cmp(&Value::Bool(true)), Ordering::Less);
    }

    #[test]
    fn entity_json_round_trip() {
        let mut node = NodeObject::new("n-1");
        node.properties.insert("name".into(), Value::String("Ada".into()));
        let json = Value::Node(Box::new(node.clone())).to_json();
        assert_eq!(Value::from_json(&json), Value::Node(Box::new(node)));
    }

    #[test]
    fn edge_json_round_trip() {
        let mut edge = EdgeObject::new("e-1", "a", "b", "KNOWS");
        edge.properties.insert("since".into(), Value::Int(2020));
        let json = Value::Edge(Box::new(edge.clone())).to_json();
        assert_eq!(Value::from_json(&json), Value::Edge(Box::new(edge)));
    }

    #[test]
    fn duration_rendering_keeps_hours() {
        let d = IsoDuration { months: 0, days: 0, seconds: 30 * 3600, nanoseconds: 0 };
        assert_eq!(d.to_string(), "PT30H");
        let d = IsoDuration { months: 14, days: 3, seconds: 0, nanoseconds: 0 };
        assert_eq!(d.to_string(), "P14M3D");
    }
}
