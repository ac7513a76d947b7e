//! Plain (non-collection) cell state: a tree of [`Value`]s addressed by [`StatePath`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a node in the state tree, e.g. `listeners/mass/dry_mass`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatePath(Vec<String>);

impl StatePath {
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Self {
        Self(segments.iter().map(|s| s.as_ref().to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }
}

impl From<&str> for StatePath {
    /// Parses a `/`-separated path; empty segments are dropped.
    fn from(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<f64>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Failure of an arithmetic or structural operation on [`Value`]s.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("cannot {op} a {kind} value")]
    NotNumeric { op: &'static str, kind: &'static str },
    #[error("cannot combine {left} with {right}")]
    Mismatch {
        left: &'static str,
        right: &'static str,
    },
    #[error("array lengths differ ({left} vs {right})")]
    ArrayLength { left: usize, right: usize },
    #[error("path {0} crosses a non-map value")]
    NotAMap(StatePath),
}

impl Value {
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_empty_map(&self) -> bool {
        matches!(self, Value::Map(m) if m.is_empty())
    }

    pub fn get_path(&self, path: &StatePath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self, |node, key| node.as_map()?.get(key))
    }

    /// Write `value` at `path`, creating intermediate maps as needed.
    pub fn set_path(&mut self, path: &StatePath, value: Value) -> Result<(), ValueError> {
        let Some((last, parents)) = path.segments().split_last() else {
            *self = value;
            return Ok(());
        };
        let mut node = self;
        for key in parents {
            let Value::Map(map) = node else {
                return Err(ValueError::NotAMap(path.clone()));
            };
            node = map.entry(key.clone()).or_insert_with(Value::empty_map);
        }
        match node {
            Value::Map(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            _ => Err(ValueError::NotAMap(path.clone())),
        }
    }

    /// Numeric addition; maps add key-wise and keys missing on the left are inserted.
    pub fn add(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                Ok(Value::Float(*a as f64 + b))
            }
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Err(ValueError::ArrayLength {
                        left: a.len(),
                        right: b.len(),
                    });
                }
                Ok(Value::Array(a.iter().zip(b).map(|(x, y)| x + y).collect()))
            }
            (Value::Map(a), Value::Map(b)) => {
                let mut out = a.clone();
                for (key, delta) in b {
                    let merged = match a.get(key) {
                        Some(current) => current.add(delta)?,
                        None => delta.clone(),
                    };
                    out.insert(key.clone(), merged);
                }
                Ok(Value::Map(out))
            }
            (left, right) if left.kind() == right.kind() => Err(ValueError::NotNumeric {
                op: "add",
                kind: left.kind(),
            }),
            (left, right) => Err(ValueError::Mismatch {
                left: left.kind(),
                right: right.kind(),
            }),
        }
    }

    pub fn negate(&self) -> Result<Value, ValueError> {
        match self {
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Array(a) => Ok(Value::Array(a.iter().map(|x| -x).collect())),
            Value::Map(m) => m
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.negate()?)))
                .collect::<Result<BTreeMap<_, _>, ValueError>>()
                .map(Value::Map),
            other => Err(ValueError::NotNumeric {
                op: "negate",
                kind: other.kind(),
            }),
        }
    }

    /// `self - before`, the delta that `add` would apply to `before` to reach `self`.
    ///
    /// Keys present only in `before` come back negated, so the result always
    /// satisfies `before.add(&delta) == self` for numeric leaves.
    pub fn delta_from(&self, before: &Value) -> Result<Value, ValueError> {
        match (self, before) {
            (Value::Map(after), Value::Map(prior)) => {
                let mut out = BTreeMap::new();
                for (key, value) in after {
                    let delta = match prior.get(key) {
                        Some(old) => value.delta_from(old)?,
                        None => value.clone(),
                    };
                    out.insert(key.clone(), delta);
                }
                for (key, old) in prior {
                    if !after.contains_key(key) {
                        out.insert(key.clone(), old.negate()?);
                    }
                }
                Ok(Value::Map(out))
            }
            _ => self.add(&before.negate()?),
        }
    }

    /// Zero of the same shape, used by dividers that reset numeric state.
    pub fn zeroed(&self) -> Value {
        match self {
            Value::Bool(_) => Value::Bool(false),
            Value::Int(_) => Value::Int(0),
            Value::Float(_) => Value::Float(0.0),
            Value::Text(_) => Value::Text(String::new()),
            Value::Array(a) => Value::Array(vec![0.0; a.len()]),
            Value::List(_) => Value::List(Vec::new()),
            Value::Map(m) => Value::Map(m.iter().map(|(k, v)| (k.clone(), v.zeroed())).collect()),
        }
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(v)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
