//! Domain keys, records and the values loaders cache

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier meaningful to the backing store
///
/// A primary key, a single indexed field value, or a tuple of indexed field
/// values for composite lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainKey {
    Int(i64),
    Str(String),
    Composite(Vec<DomainKey>),
}

impl DomainKey {
    /// Key from a JSON scalar or array; `None` for null, floats, bools and objects
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(DomainKey::Int),
            Value::String(s) => Some(DomainKey::Str(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(DomainKey::from_json)
                .collect::<Option<Vec<_>>>()
                .map(DomainKey::Composite),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            DomainKey::Int(i) => Value::from(*i),
            DomainKey::Str(s) => Value::String(s.clone()),
            DomainKey::Composite(parts) => Value::Array(parts.iter().map(DomainKey::to_json).collect()),
        }
    }

    /// Identifier used in cache keys
    ///
    /// Unlike `Display`, strings are quoted so `Int(1)`, `Str("1")` and a
    /// composite never share an identifier.
    pub fn cache_identifier(&self) -> String {
        match self {
            DomainKey::Int(i) => i.to_string(),
            DomainKey::Str(_) | DomainKey::Composite(_) => self.to_json().to_string(),
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainKey::Int(i) => write!(f, "{}", i),
            DomainKey::Str(s) => write!(f, "{}", s),
            DomainKey::Composite(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<i64> for DomainKey {
    fn from(i: i64) -> Self {
        DomainKey::Int(i)
    }
}

impl From<i32> for DomainKey {
    fn from(i: i32) -> Self {
        DomainKey::Int(i64::from(i))
    }
}

impl From<&str> for DomainKey {
    fn from(s: &str) -> Self {
        DomainKey::Str(s.to_string())
    }
}

impl From<String> for DomainKey {
    fn from(s: String) -> Self {
        DomainKey::Str(s)
    }
}

impl From<Vec<DomainKey>> for DomainKey {
    fn from(parts: Vec<DomainKey>) -> Self {
        DomainKey::Composite(parts)
    }
}

/// A row as returned by the backing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: DomainKey,

    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<DomainKey>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Set an attribute
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Value of `name` as a lookup key; `id` always resolves to the primary key
    pub fn field_key(&self, name: &str) -> Option<DomainKey> {
        if name == "id" {
            return Some(self.id.clone());
        }
        self.get(name).and_then(DomainKey::from_json)
    }

    /// Lookup key over several fields, composite when there is more than one
    pub fn fields_key(&self, fields: &[String]) -> Option<DomainKey> {
        match fields {
            [single] => self.field_key(single),
            _ => fields
                .iter()
                .map(|field| self.field_key(field))
                .collect::<Option<Vec<_>>>()
                .map(DomainKey::Composite),
        }
    }
}

/// Value a loader produces for one domain key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Cached {
    /// One record
    Record(Record),

    /// Associated records, in source order
    Records(Vec<Record>),

    /// Ids of associated records
    Ids(Vec<DomainKey>),

    /// A single attribute; `Null` is an explicit null, not absence
    Attribute(Value),
}

impl Cached {
    /// Records carried by this value
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Cached::Record(record) => vec![record],
            Cached::Records(records) => records,
            Cached::Ids(_) | Cached::Attribute(_) => Vec::new(),
        }
    }

    pub fn into_ids(self) -> Vec<DomainKey> {
        match self {
            Cached::Ids(ids) => ids,
            Cached::Record(record) => vec![record.id],
            Cached::Records(records) => records.into_iter().map(|r| r.id).collect(),
            Cached::Attribute(_) => Vec::new(),
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Cached::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Outcome of loading one key: `None` when the source has no value
pub type Loaded = Option<Cached>;
