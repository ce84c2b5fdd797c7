//! Values returned by a managed agent
//!
//! Agents answer attribute reads and operation invocations with scalars,
//! lists, records (named fields) or tables (rows addressed by a composite
//! key built from one or more index columns).

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// A value read from or returned by a managed agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Record(Record),
    Table(Table),
}

impl Value {
    /// Whether this value can be walked by a value path
    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Record(_) | Self::Table(_))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render a scalar as a table-key component
    ///
    /// Containers never take part in a row key and return `None`.
    #[must_use]
    pub fn key_component(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null | Self::List(_) | Self::Record(_) | Self::Table(_) => None,
        }
    }

    /// Numeric view of a scalar, parsing text when needed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Null | Self::List(_) | Self::Record(_) | Self::Table(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::List(_) | Self::Record(_) | Self::Table(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(v: Vec<Self>) -> Self {
        Self::List(v)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Named-field structured value; field order is preserved
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field values in declaration order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Keyed collection of records
///
/// Every row is a [`Record`] that carries the index columns alongside its
/// payload columns. A row's composite key is the ordered list of its index
/// column values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    index: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    /// Create an empty table keyed by the given index columns
    #[must_use]
    pub fn new<I, S>(index: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index: index.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builder-style row insertion
    #[must_use]
    pub fn with_row(mut self, row: Record) -> Self {
        self.rows.push(row);
        self
    }

    pub fn push(&mut self, row: Record) {
        self.rows.push(row);
    }

    /// Index column names
    #[must_use]
    pub fn index(&self) -> &[String] {
        &self.index
    }

    #[must_use]
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Composite key of a row, or `None` if an index column is missing or
    /// not a scalar
    #[must_use]
    pub fn row_key(&self, row: &Record) -> Option<Vec<String>> {
        self.index
            .iter()
            .map(|col| row.get(col).and_then(Value::key_component))
            .collect()
    }

    /// Locate the row whose composite key equals `key`
    #[must_use]
    pub fn find<S: AsRef<str>>(&self, key: &[S]) -> Option<&Record> {
        if key.len() != self.index.len() {
            return None;
        }
        self.rows.iter().find(|row| {
            self.row_key(row).is_some_and(|row_key| {
                row_key
                    .iter()
                    .zip(key)
                    .all(|(have, want)| have == want.as_ref())
            })
        })
    }
}
