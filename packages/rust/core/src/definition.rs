//! Pipeline definition files (TOML or JSON).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use enrichflow_mapping::{FieldDefinition, FieldMapping};
use enrichflow_shared::{EnrichflowError, FailureLimit, PipelineOptions, Result};
use enrichflow_skills::SkillDefinition;

/// Everything needed to build a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Failure budgets carried with the pipeline.
    #[serde(default)]
    pub parameters: PipelineParameters,

    #[serde(default)]
    pub skills: Vec<SkillDefinition>,

    /// Applied to the raw document, before enrichment.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,

    /// Applied to the enriched document; wins over `field_mappings`.
    #[serde(default)]
    pub output_field_mappings: Vec<FieldMapping>,

    pub index: IndexDefinition,
}

/// `[index]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub fields: Vec<FieldDefinition>,
}

/// `[parameters]` section. Unset values fall back to the app config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failed_documents: Option<FailureLimit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failed_fields_per_document: Option<FailureLimit>,
}

impl PipelineParameters {
    /// Layer these parameters over `options`.
    pub fn apply(&self, mut options: PipelineOptions) -> PipelineOptions {
        if let Some(limit) = self.max_failed_documents {
            options.max_failed_documents = limit;
        }
        if let Some(limit) = self.max_failed_fields_per_document {
            options.max_failed_fields_per_document = limit;
        }
        options
    }
}

impl PipelineDefinition {
    /// Load from a file; `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EnrichflowError::io(path, e))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        let definition: Self = parsed.map_err(|e| {
            EnrichflowError::config(format!("failed to load pipeline {}: {e}", path.display()))
        })?;
        debug!(?path, skills = definition.skills.len(), "loaded pipeline definition");
        Ok(definition)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EnrichflowError::config(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| EnrichflowError::config(e.to_string()))
    }
}
