//! Core types shared by the adapter, the translators and the clients.
//!
//! These mirror the Cloud Datastore data model closely enough that a client can
//! map them onto its wire format one-to-one, while staying plain enough for the
//! ORM side to treat records as simple attribute maps.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use gcd_common::{Error, Result};

/// A plain ORM record: attribute name to value.
pub type Record = BTreeMap<String, Value>;

/// Name of the reserved property that addresses an entity's key in filters and orders.
pub const KEY_PROPERTY: &str = "__key__";

/// Universal value type covering every Datastore property type.
///
/// Converts to and from `serde_json::Value` so records can cross the ORM
/// boundary as JSON. JSON never produces `Timestamp`, `Key` or `GeoPoint`;
/// those only come back from the store.
///
/// # Example
///
/// ```rust
/// use sails_google_cloud_datastore::core::Value;
///
/// let s = Value::String("hello".into());
/// let n = Value::Integer(42);
/// let arr = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// Null or explicitly cleared value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Point in time
    Timestamp(DateTime<Utc>),
    /// Binary data
    Bytes(Vec<u8>),
    /// Reference to another entity
    Key(Key),
    /// Latitude/longitude pair
    GeoPoint { latitude: f64, longitude: f64 },
    /// Array of values
    Array(Vec<Value>),
    /// Embedded entity
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Check if the value is null
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as integer
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as object/map
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Bytes(_) => "bytes",
            Value::Key(_) => "key",
            Value::GeoPoint { .. } => "geo_point",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
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
        Value::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Key> for Value {
    fn from(v: Key) -> Self {
        Value::Key(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s),
            Value::Timestamp(t) => {
                serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Bytes(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Key(k) => serde_json::Value::String(k.to_string()),
            Value::GeoPoint { latitude, longitude } => serde_json::json!({
                "latitude": latitude,
                "longitude": longitude,
            }),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => {
                serde_json::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Identifier of the last element of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// Numeric id
    Id(i64),
    /// String name
    Name(String),
}

impl KeyId {
    /// Build an identifier from a primary-key value.
    ///
    /// Only strings and integers can identify a Datastore entity.
    pub fn from_value(attribute: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(KeyId::Name(s.clone())),
            Value::Integer(i) if *i > 0 => Ok(KeyId::Id(*i)),
            Value::Null => Err(Error::Validation(format!(
                "Missing value for property `{}`.",
                attribute
            ))),
            other => Err(Error::Validation(format!(
                "Primary key `{}` must be a non-empty string or a positive integer, got {}",
                attribute,
                other.type_name()
            ))),
        }
    }

    /// The identifier as a record value
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            KeyId::Id(i) => Value::Integer(*i),
            KeyId::Name(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(i) => write!(f, "{}", i),
            KeyId::Name(s) => write!(f, "{:?}", s),
        }
    }
}

/// One `(kind, id)` segment of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    pub id: KeyId,
}

/// Native Datastore key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Namespace the key lives in (`None` is the default namespace)
    pub namespace: Option<String>,
    /// Ancestor path, root first
    pub path: Vec<PathElement>,
}

impl Key {
    /// Key made of a single `[kind, id]` path element
    pub fn new(kind: impl Into<String>, id: KeyId) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.into(),
                id,
            }],
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Kind of the entity the key addresses
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.path.last().map(|e| e.kind.as_str())
    }

    /// Identifier of the entity the key addresses
    #[must_use]
    pub fn id(&self) -> Option<&KeyId> {
        self.path.last().map(|e| &e.id)
    }

    /// The identifier as a record value, or `Null` for an empty path
    #[must_use]
    pub fn id_value(&self) -> Value {
        self.id().map_or(Value::Null, KeyId::to_value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .path
            .iter()
            .map(|e| format!("{}, {}", e.kind, e.id))
            .collect();
        write!(f, "Key({})", parts.join(", "))
    }
}

/// A stored entity: its key plus its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    pub properties: Record,
}

impl Entity {
    pub fn new(key: Key, properties: Record) -> Self {
        Self { key, properties }
    }
}

/// A write applied by a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create; fails if the entity exists
    Insert(Entity),
    /// Create or replace
    Upsert(Entity),
    /// Replace; fails if the entity does not exist
    Update(Entity),
    /// Remove; succeeds if the entity does not exist
    Delete(Key),
}

impl Mutation {
    /// Key the mutation targets
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Insert(e) | Mutation::Upsert(e) | Mutation::Update(e) => &e.key,
            Mutation::Delete(k) => k,
        }
    }
}

/// Opaque transaction handle returned by `begin_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub String);
