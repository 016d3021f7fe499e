//! The document tree and wildcard-aware path resolution.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use enrichflow_shared::{EnrichflowError, Result};

use crate::path::{FieldPath, Segment};
use crate::value::Value;

/// A node of named fields. Field names are unique; insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: IndexMap<String, Value>,
}

impl Document {
    /// An empty node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self::from_json_map(map)),
            other => Err(EnrichflowError::parse(format!(
                "a document must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub(crate) fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let fields = map
            .into_iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k, v)))
            .collect();
        Self { fields }
    }

    /// Serialize to a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Direct child field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Insert or replace a direct child field. Replacing keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All values at `path`, in document order.
    ///
    /// A `*` yields one value per matching element. No match is an empty
    /// result, not an error. The root itself is not a value, so `/document`
    /// yields nothing.
    pub fn get(&self, path: &FieldPath) -> Vec<&Value> {
        self.resolve(path).into_iter().map(|(_, v)| v).collect()
    }

    /// Like [`Document::get`], paired with each match's concrete path
    /// (wildcard bound to an element index).
    pub fn resolve(&self, path: &FieldPath) -> Vec<(FieldPath, &Value)> {
        let mut out = Vec::new();
        descend_node(self, path.segments(), FieldPath::root(), &mut out);
        out
    }

    /// Concrete instances of a skill context, in element order.
    ///
    /// The root context has exactly one instance, `/document`. An element
    /// context such as `/document/normalized_images/*` has one instance per
    /// element currently present.
    pub fn instances(&self, context: &FieldPath) -> Vec<FieldPath> {
        if context.segments().is_empty() {
            return vec![FieldPath::root()];
        }
        self.resolve(context).into_iter().map(|(p, _)| p).collect()
    }

    /// Write `value` at a wildcard-free path, creating intermediate nodes.
    ///
    /// Concrete element indices are allowed but must point at existing
    /// elements. Writing through a scalar is an error.
    pub fn set(&mut self, path: &FieldPath, value: Value) -> Result<()> {
        if path.has_wildcard() {
            return Err(EnrichflowError::path(
                path.to_string(),
                "cannot write to a wildcard path",
            ));
        }
        if path.segments().is_empty() {
            return Err(EnrichflowError::path(
                path.to_string(),
                "cannot replace the document root",
            ));
        }
        set_in_node(self, path.segments(), path, value)
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn descend_node<'a>(
    node: &'a Document,
    segments: &[Segment],
    at: FieldPath,
    out: &mut Vec<(FieldPath, &'a Value)>,
) {
    let Some((Segment::Field(name), rest)) = segments.split_first() else {
        return;
    };
    if let Some(value) = node.fields.get(name) {
        descend_value(value, rest, at.child(name.as_str()), out);
    }
}

fn descend_value<'a>(
    value: &'a Value,
    segments: &[Segment],
    at: FieldPath,
    out: &mut Vec<(FieldPath, &'a Value)>,
) {
    let Some((first, rest)) = segments.split_first() else {
        out.push((at, value));
        return;
    };

    match (first, value) {
        (Segment::Field(_), Value::Node(node)) => descend_node(node, segments, at, out),
        (Segment::Wildcard, Value::Sequence(items)) => {
            for (i, item) in items.iter().enumerate() {
                descend_value(item, rest, at.index(i), out);
            }
        }
        (Segment::Index(i), Value::Sequence(items)) => {
            if let Some(item) = items.get(*i) {
                descend_value(item, rest, at.index(*i), out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

fn set_in_node(
    node: &mut Document,
    segments: &[Segment],
    full: &FieldPath,
    value: Value,
) -> Result<()> {
    match segments {
        [Segment::Field(name)] => {
            node.fields.insert(name.clone(), value);
            Ok(())
        }
        [Segment::Field(name), rest @ ..] => {
            let child = node
                .fields
                .entry(name.clone())
                .or_insert_with(|| Value::Node(Document::new()));
            set_in_value(child, rest, full, value)
        }
        _ => Err(EnrichflowError::path(
            full.to_string(),
            "a node can only be addressed by field name",
        )),
    }
}

fn set_in_value(
    target: &mut Value,
    segments: &[Segment],
    full: &FieldPath,
    value: Value,
) -> Result<()> {
    match (&segments[0], target) {
        (Segment::Field(_), Value::Node(node)) => set_in_node(node, segments, full, value),
        (Segment::Index(i), Value::Sequence(items)) => {
            let len = items.len();
            let slot = items.get_mut(*i).ok_or_else(|| {
                EnrichflowError::path(
                    full.to_string(),
                    format!("element {i} is out of range for a sequence of {len}"),
                )
            })?;
            if segments.len() == 1 {
                *slot = value;
                Ok(())
            } else {
                set_in_value(slot, &segments[1..], full, value)
            }
        }
        (_, other) => Err(EnrichflowError::path(
            full.to_string(),
            format!("cannot write through a {} value", other.kind_name()),
        )),
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(json).map_err(serde::de::Error::custom)
    }
}
