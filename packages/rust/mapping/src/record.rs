//! Flattened output records.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use enrichflow_document::Value;

use crate::schema::IndexSchema;

/// Target field name to value, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputRecord {
    fields: IndexMap<String, Value>,
}

impl OutputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. Replacing an existing field keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The key value, if present and a non-empty string.
    pub fn key<'a>(&'a self, schema: &IndexSchema) -> Option<&'a str> {
        self.get(&schema.key_field().name)
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
    }

    /// Reorder fields to follow the schema.
    pub fn conform_to(&mut self, schema: &IndexSchema) {
        let rank = |name: &str| schema.position(name).unwrap_or(usize::MAX);
        self.fields.sort_by(|a, _, b, _| rank(a).cmp(&rank(b)));
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
