//! Declarative skill definitions, as loaded from pipeline files.

use serde::{Deserialize, Serialize};

/// Context used when a definition does not name one.
pub const DEFAULT_CONTEXT: &str = "/document";

/// One skill: where it runs, what it reads, and what it writes.
///
/// Paths are kept as strings here and parsed when the skill graph is built,
/// so a malformed path surfaces as a configuration error at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    /// Unique skill name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub kind: SkillKind,

    /// `/document` or an element context such as `/document/normalized_images/*`.
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default)]
    pub inputs: Vec<InputMapping>,

    #[serde(default)]
    pub outputs: Vec<OutputMapping>,
}

fn default_context() -> String {
    DEFAULT_CONTEXT.to_string()
}

/// How a skill is carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillKind {
    /// Sent to the injected [`SkillInvoker`](crate::SkillInvoker).
    External {
        /// Opaque type string, e.g. `language_detection` or `ocr`.
        skill_type: String,
    },
    /// Built-in text merge; never leaves the process.
    Merge {
        #[serde(default)]
        insert_pre_tag: String,
        #[serde(default)]
        insert_post_tag: String,
    },
}

impl SkillKind {
    /// The type string reported in invocations and logs.
    pub fn type_name(&self) -> &str {
        match self {
            Self::External { skill_type } => skill_type,
            Self::Merge { .. } => "merge",
        }
    }
}

/// Named parameter bound to a source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMapping {
    pub name: String,
    /// Absolute (`/document/...`) or relative to the context instance.
    pub source: String,
}

/// Produced field and the name it is written under, relative to the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

impl OutputMapping {
    /// Target field name; defaults to the output name.
    pub fn target(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

impl SkillDefinition {
    /// An external skill running at the document root.
    pub fn external(name: impl Into<String>, skill_type: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            SkillKind::External {
                skill_type: skill_type.into(),
            },
        )
    }

    /// A built-in merge skill running at the document root.
    pub fn merge(
        name: impl Into<String>,
        insert_pre_tag: impl Into<String>,
        insert_post_tag: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            SkillKind::Merge {
                insert_pre_tag: insert_pre_tag.into(),
                insert_post_tag: insert_post_tag.into(),
            },
        )
    }

    fn with_kind(name: impl Into<String>, kind: SkillKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
            context: default_context(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the context path.
    pub fn at(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Append an input mapping.
    pub fn input(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.inputs.push(InputMapping {
            name: name.into(),
            source: source.into(),
        });
        self
    }

    /// Append an output mapping written under `target_name`.
    pub fn output(mut self, name: impl Into<String>, target_name: impl Into<String>) -> Self {
        self.outputs.push(OutputMapping {
            name: name.into(),
            target_name: Some(target_name.into()),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_flat_toml_form() {
        let toml_str = r#"
name = "get-image-text"
kind = "external"
skill_type = "ocr"
context = "/document/normalized_images/*"
inputs = [{ name = "image", source = "/document/normalized_images/*" }]
outputs = [{ name = "text", target_name = "text" }, { name = "layoutText" }]
"#;
        let skill: SkillDefinition = toml::from_str(toml_str).unwrap();
        assert_eq!(skill.kind.type_name(), "ocr");
        assert_eq!(skill.context, "/document/normalized_images/*");
        assert_eq!(skill.outputs[1].target(), "layoutText");
    }

    #[test]
    fn merge_tags_default_to_empty() {
        let json = r#"{"name":"merge-text","kind":"merge"}"#;
        let skill: SkillDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(
            skill.kind,
            SkillKind::Merge {
                insert_pre_tag: String::new(),
                insert_post_tag: String::new()
            }
        );
        assert_eq!(skill.context, DEFAULT_CONTEXT);
    }

    #[test]
    fn builder_matches_serde_form() {
        let built = SkillDefinition::external("get-language", "language_detection")
            .input("text", "/document/content")
            .output("languageCode", "language");
        let json = serde_json::to_value(&built).unwrap();
        assert_eq!(json["kind"], "external");
        assert_eq!(json["skill_type"], "language_detection");
        let back: SkillDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, built);
    }
}
