use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Blob,
    Timestamp,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Blob => "blob",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Converts a literal into this column's native representation.
    ///
    /// Returns `None` when the value cannot be represented without loss.
    /// `Null` converts to `Null` for every type; nullability is checked by
    /// the caller.
    pub fn convert(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (ColumnType::Text, Value::Text(_)) => Some(value.clone()),
            (ColumnType::Text, Value::Integer(i)) => Some(Value::Text(i.to_string().into())),
            (ColumnType::Text, Value::Float(f)) => Some(Value::Text(f.to_string().into())),
            (ColumnType::Text, Value::Boolean(b)) => Some(Value::Text(b.to_string().into())),
            (ColumnType::Integer, Value::Integer(_)) => Some(value.clone()),
            (ColumnType::Integer, Value::Boolean(b)) => Some(Value::Integer(i64::from(*b))),
            (ColumnType::Integer, Value::Float(f)) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(Value::Integer(*f as i64))
                } else {
                    None
                }
            }
            (ColumnType::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Integer),
            (ColumnType::Float, Value::Float(_)) => Some(value.clone()),
            (ColumnType::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
            (ColumnType::Float, Value::Text(s)) => s.trim().parse().ok().map(Value::Float),
            (ColumnType::Boolean, Value::Boolean(_)) => Some(value.clone()),
            (ColumnType::Boolean, Value::Integer(0)) => Some(Value::Boolean(false)),
            (ColumnType::Boolean, Value::Integer(1)) => Some(Value::Boolean(true)),
            (ColumnType::Blob, Value::Blob(_)) => Some(value.clone()),
            (ColumnType::Blob, Value::Text(s)) => Some(Value::Blob(s.as_bytes().to_vec())),
            (ColumnType::Timestamp, Value::Timestamp(_)) => Some(value.clone()),
            (ColumnType::Timestamp, Value::Integer(i)) => Some(Value::Timestamp(*i)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Text(CompactString),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    Timestamp(i64),
    Null,
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Float(_) => 4,
            Value::Text(_) => 5,
            Value::Blob(_) => 6,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Timestamp(_) => "timestamp",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Timestamp(ts) => write!(f, "ts:{ts}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) | Value::Timestamp(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
        }
    }
}

/// A SQL row in schema column order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
