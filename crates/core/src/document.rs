//! Document payloads
//!
//! A [`Document`] is the on-wire JSON object stored for one root entity,
//! with every owned entity embedded inside it. It is a newtype around a
//! `serde_json` object map providing:
//! - Direct access to the underlying map via Deref/DerefMut
//! - Change-aware field writes used by in-place updates
//! - Stamping of the reserved store fields
//!
//! # Reserved fields
//!
//! | Field | Constant | Meaning |
//! |-------|----------|---------|
//! | `id` | [`ID_FIELD`] | Document identifier within its collection |
//! | `__partitionKey` | [`PARTITION_KEY_FIELD`] | Store-level routing key |
//!
//! The discriminator field name is chosen per entity type and is reserved
//! in the same way.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// Name of the document identifier field
pub const ID_FIELD: &str = "id";

/// Name of the partition key field
pub const PARTITION_KEY_FIELD: &str = "__partitionKey";

/// Default partition key value stamped on new documents
pub const DEFAULT_PARTITION_KEY_VALUE: &str = "0";

/// JSON object document
///
/// # Examples
///
/// ```
/// use nestdoc_core::Document;
/// use serde_json::json;
///
/// let mut doc = Document::new();
/// assert!(doc.set_field("name", json!("Alfreds")));
/// // Writing the same value again is not a change
/// assert!(!doc.set_field("name", json!("Alfreds")));
/// assert_eq!(doc.get("name"), Some(&json!("Alfreds")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Create from an existing object map
    pub fn from_map(map: Map<String, Value>) -> Self {
        Document(map)
    }

    /// Create from a JSON value, returning `None` unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Document(map)),
            _ => None,
        }
    }

    /// Get the underlying object map
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Convert into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Write a field, returning whether the stored value changed
    pub fn set_field(&mut self, field: &str, value: Value) -> bool {
        match self.0.get(field) {
            Some(existing) if *existing == value => false,
            _ => {
                self.0.insert(field.to_string(), value);
                true
            }
        }
    }

    /// The document identifier, if stamped
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Stamp the partition key field
    pub fn stamp_partition_key(&mut self, value: &str) {
        self.0
            .insert(PARTITION_KEY_FIELD.to_string(), Value::String(value.to_string()));
    }

    /// The partition key, if stamped
    pub fn partition_key(&self) -> Option<&str> {
        self.0.get(PARTITION_KEY_FIELD).and_then(Value::as_str)
    }

    /// Serialize to compact JSON string
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl FromStr for Document {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(Document)
    }
}

impl Deref for Document {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json_string())
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}
