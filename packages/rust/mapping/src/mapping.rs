//! Field mappings and their projection into output records.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use enrichflow_document::{Document, FieldPath, Value};
use enrichflow_shared::{EnrichflowError, Result};

use crate::functions::{MappingFunction, MappingFunctionSpec};
use crate::record::OutputRecord;
use crate::schema::{FieldKind, IndexSchema};

/// One source path to one index field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Bare field name, `/document/...` path, or skill output path.
    #[serde(alias = "sourceFieldName")]
    pub source: String,
    #[serde(alias = "targetFieldName")]
    pub target: String,
    #[serde(
        default,
        alias = "mappingFunction",
        skip_serializing_if = "Option::is_none"
    )]
    pub function: Option<MappingFunctionSpec>,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            function: None,
        }
    }

    pub fn with_function(mut self, function: MappingFunctionSpec) -> Self {
        self.function = Some(function);
        self
    }
}

/// A tolerated mapping failure for one target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWarning {
    pub target: String,
    pub source: String,
    pub message: String,
}

impl std::fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field '{}' from {}: {}", self.target, self.source, self.message)
    }
}

#[derive(Debug, Clone)]
struct CompiledMapping {
    source: FieldPath,
    target: String,
    kind: FieldKind,
    function: Option<MappingFunction>,
}

/// An ordered, validated mapping table bound to one schema.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    mappings: Vec<CompiledMapping>,
}

impl MappingTable {
    /// Validate `mappings` against `schema`.
    ///
    /// Fails on an unknown target, a target mapped twice, a wildcard source
    /// feeding a non-collection field, or an invalid mapping function.
    pub fn build(mappings: &[FieldMapping], schema: &IndexSchema) -> Result<Self> {
        let mut targets = HashSet::new();
        let mut compiled = Vec::with_capacity(mappings.len());

        for mapping in mappings {
            let field = schema.field(&mapping.target).ok_or_else(|| {
                EnrichflowError::config(format!(
                    "mapping target '{}' is not an index field",
                    mapping.target
                ))
            })?;
            if !targets.insert(mapping.target.as_str()) {
                return Err(EnrichflowError::config(format!(
                    "index field '{}' is mapped twice in one table",
                    mapping.target
                )));
            }

            let source = FieldPath::parse(&mapping.source)
                .map_err(|e| {
                    EnrichflowError::config(format!("mapping to '{}': {e}", mapping.target))
                })?
                .to_absolute();
            if source.has_wildcard() && !field.kind.is_collection() {
                return Err(EnrichflowError::config(format!(
                    "wildcard source {source} cannot map to '{}' of type {}",
                    mapping.target, field.kind
                )));
            }

            let function = mapping
                .function
                .as_ref()
                .map(MappingFunction::from_spec)
                .transpose()?;

            compiled.push(CompiledMapping {
                source,
                target: mapping.target.clone(),
                kind: field.kind.clone(),
                function,
            });
        }

        Ok(Self { mappings: compiled })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn maps_target(&self, target: &str) -> bool {
        self.mappings.iter().any(|m| m.target == target)
    }

    /// Write every mapped value of `document` into `record`.
    ///
    /// A missing source leaves its target untouched. Function and coercion
    /// failures leave the target absent and are returned as warnings.
    pub fn project(&self, document: &Document, record: &mut OutputRecord) -> Vec<FieldWarning> {
        let mut warnings = Vec::new();

        for mapping in &self.mappings {
            let values = document.get(&mapping.source);
            let raw = if mapping.source.has_wildcard() {
                if values.is_empty() {
                    continue;
                }
                Value::Sequence(values.into_iter().cloned().collect())
            } else {
                match values.into_iter().next() {
                    Some(value) => value.clone(),
                    None => continue,
                }
            };

            let converted = match &mapping.function {
                Some(function) => function.apply(&raw),
                None => Ok(raw),
            }
            .and_then(|value| mapping.kind.coerce(&value));

            match converted {
                Ok(value) => record.insert(mapping.target.clone(), value),
                Err(message) => {
                    debug!(target_field = %mapping.target, source = %mapping.source, %message, "mapping failed");
                    warnings.push(FieldWarning {
                        target: mapping.target.clone(),
                        source: mapping.source.to_string(),
                        message,
                    });
                }
            }
        }

        warnings
    }
}

/// The key field must be mapped by at least one of `tables`.
pub fn ensure_key_mapped(schema: &IndexSchema, tables: &[&MappingTable]) -> Result<()> {
    let key = &schema.key_field().name;
    if tables.iter().any(|t| t.maps_target(key)) {
        Ok(())
    } else {
        Err(EnrichflowError::config(format!(
            "key field '{key}' has no field mapping"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDefinition;
    use serde_json::json;

    fn collection(kind: FieldKind) -> FieldKind {
        FieldKind::Collection(Box::new(kind))
    }

    fn schema() -> IndexSchema {
        IndexSchema::new(vec![
            FieldDefinition::key("id"),
            FieldDefinition::new("file_name", FieldKind::String),
            FieldDefinition::new("size", FieldKind::Int64),
            FieldDefinition::new("last_modified", FieldKind::DateTime),
            FieldDefinition::new("sentiment", FieldKind::Double),
            FieldDefinition::new("image_text", collection(FieldKind::String)),
            FieldDefinition::new("key_phrases", collection(FieldKind::String)),
        ])
        .unwrap()
    }

    fn doc() -> Document {
        Document::from_json(json!({
            "metadata_storage_path": "https://store/margies/a.pdf",
            "metadata_storage_name": "a.pdf",
            "metadata_storage_size": 1024.0,
            "metadata_storage_last_modified": "2019-06-05T10:00:00Z",
            "normalized_images": [{"text": "one"}, {}, {"text": "two"}],
            "keyPhrases": ["beach", "hotel"]
        }))
        .unwrap()
    }

    #[test]
    fn projects_and_coerces_source_fields() {
        let table = MappingTable::build(
            &[
                FieldMapping::new("metadata_storage_path", "id")
                    .with_function(MappingFunctionSpec::new("base64Encode")),
                FieldMapping::new("metadata_storage_name", "file_name"),
                FieldMapping::new("metadata_storage_size", "size"),
                FieldMapping::new("metadata_storage_last_modified", "last_modified"),
                FieldMapping::new("metadata_author", "sentiment"),
            ],
            &schema(),
        )
        .unwrap();

        let mut record = OutputRecord::new();
        let warnings = table.project(&doc(), &mut record);
        assert!(warnings.is_empty());
        assert_eq!(record.get("size"), Some(&Value::Integer(1024)));
        assert!(matches!(record.get("last_modified"), Some(Value::DateTime(_))));
        assert!(record.key(&schema()).is_some());
        // Missing source leaves the target absent.
        assert!(!record.contains("sentiment"));
    }

    #[test]
    fn wildcard_sources_collect_in_document_order() {
        let table = MappingTable::build(
            &[
                FieldMapping::new("/document/normalized_images/*/text", "image_text"),
                FieldMapping::new("/document/keyPhrases/*", "key_phrases"),
            ],
            &schema(),
        )
        .unwrap();
        let mut record = OutputRecord::new();
        table.project(&doc(), &mut record);
        assert_eq!(record.get("image_text"), Some(&Value::from(vec!["one", "two"])));
        assert_eq!(record.get("key_phrases"), Some(&Value::from(vec!["beach", "hotel"])));
    }

    #[test]
    fn coercion_failure_is_a_field_warning() {
        let table = MappingTable::build(
            &[FieldMapping::new("metadata_storage_name", "sentiment")],
            &schema(),
        )
        .unwrap();
        let mut record = OutputRecord::new();
        let warnings = table.project(&doc(), &mut record);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].target, "sentiment");
        assert_eq!(warnings[0].source, "/document/metadata_storage_name");
        assert!(!record.contains("sentiment"));
    }

    #[test]
    fn build_rejects_invalid_tables() {
        let unknown = MappingTable::build(&[FieldMapping::new("a", "nope")], &schema());
        assert!(unknown.unwrap_err().to_string().contains("not an index field"));

        let twice = MappingTable::build(
            &[FieldMapping::new("a", "file_name"), FieldMapping::new("b", "file_name")],
            &schema(),
        );
        assert!(twice.unwrap_err().to_string().contains("mapped twice"));

        let scalar_target = MappingTable::build(
            &[FieldMapping::new("/document/keyPhrases/*", "file_name")],
            &schema(),
        );
        assert!(scalar_target.unwrap_err().is_config());

        let bad_function = MappingTable::build(
            &[FieldMapping::new("a", "file_name").with_function(MappingFunctionSpec::new("nope"))],
            &schema(),
        );
        assert!(bad_function.unwrap_err().is_config());
    }

    #[test]
    fn key_must_be_mapped_somewhere() {
        let schema = schema();
        let source = MappingTable::build(&[FieldMapping::new("a", "file_name")], &schema).unwrap();
        let output = MappingTable::default();
        assert!(ensure_key_mapped(&schema, &[&source, &output]).is_err());

        let keyed = MappingTable::build(&[FieldMapping::new("a", "id")], &schema).unwrap();
        assert!(ensure_key_mapped(&schema, &[&source, &keyed]).is_ok());
    }

    #[test]
    fn deserializes_original_field_names() {
        let json = r#"{
            "sourceFieldName": "metadata_storage_path",
            "targetFieldName": "id",
            "mappingFunction": {"name": "base64Encode"}
        }"#;
        let mapping: FieldMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.target, "id");
        assert_eq!(mapping.function.unwrap().name, "base64Encode");
    }
}
