//! Runtime representation of a [`ProbeResult`](crate::registry::FunctionRegistry) and of every
//! intermediate result the expression evaluator (`expr.rs`) and reference expander
//! (`reference.rs`) produce.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A probe return value, or any sub-expression result derived from one. Mirrors the shapes a
/// dynamically-typed agent function can hand back: a scalar, an ordered sequence, a set (kept
/// sorted so `foreach` iteration order is deterministic), or a keyed mapping.
///
/// `Map` entries support both keyed access (`v['key']`) and attribute-style access (`v.key`) —
/// the "AttrDict" wrapping the source description calls for — by construction, since both forms
/// resolve through [`Value::field`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Seq(_) => "sequence",
            Value::Set(_) => "set",
            Value::Map(_) => "mapping",
        }
    }

    pub fn str<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    /// Builds a set value with its elements sorted, matching the "foreach automatically sorts
    /// dict and set results" rule.
    pub fn sorted_set(mut elements: Vec<Value>) -> Self {
        elements.sort_by(value_cmp);
        Value::Set(elements)
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Seq(v) | Value::Set(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Resolves both `v.field` and `v['field']` access against a mapping.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(name),
            _ => None,
        }
    }

    pub fn index(&self, idx: i64) -> Option<&Value> {
        match self {
            Value::Seq(v) | Value::Set(v) => {
                let len = v.len() as i64;
                let i = if idx < 0 { idx + len } else { idx };
                if i < 0 || i >= len { None } else { v.get(i as usize) }
            }
            _ => None,
        }
    }

    /// Entries of a mapping in sorted-by-key order, matching the mapping `foreach` rule.
    pub fn sorted_entries(&self) -> Option<Vec<(&String, &Value)>> {
        match self {
            Value::Map(m) => Some(m.iter().collect()),
            _ => None,
        }
    }

    /// Elements to drive a `foreach <v>:` loop: sequences iterate in place, sets are sorted
    /// first, matching the "foreach over a set sorts before iterating" rule. `None` for anything
    /// else (not iterable this way).
    pub fn iter_sorted(&self) -> Option<Vec<Value>> {
        match self {
            Value::Seq(v) => Some(v.clone()),
            Value::Set(v) => {
                let mut v = v.clone();
                v.sort_by(value_cmp);
                Some(v)
            }
            _ => None,
        }
    }
}

fn value_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => format!("{a}").cmp(&format!("{b}")),
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Seq(v) | Value::Set(v) => {
                write!(f, "[")?;
                for (i, e) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(a) => Value::Seq(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(yaml: serde_yaml::Value) -> Self {
        match yaml {
            serde_yaml::Value::Null => Value::None,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Value::Str(s),
            serde_yaml::Value::Sequence(a) => Value::Seq(a.into_iter().map(Value::from).collect()),
            serde_yaml::Value::Mapping(o) => Value::Map(
                o.into_iter()
                    .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), Value::from(v))))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(t) => Value::from(t.value),
        }
    }
}
