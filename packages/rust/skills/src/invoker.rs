//! The external skill port.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;

use enrichflow_document::{FieldPath, Value};
use enrichflow_shared::Result;

/// Bound inputs, keyed by input mapping name, in declaration order.
pub type SkillInputs = IndexMap<String, Value>;

/// Values produced by a skill, keyed by output name.
pub type SkillOutputs = IndexMap<String, Value>;

/// One call of one skill against one context instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillInvocation {
    pub skill: String,
    pub skill_type: String,
    /// Concrete context instance, e.g. `/document/normalized_images/2`.
    pub instance: FieldPath,
    /// Absent inputs are omitted rather than sent as null.
    pub inputs: SkillInputs,
}

/// Carries out external skills (language detection, OCR, ...).
///
/// Implementations must be safe to call concurrently; the executor issues
/// every invocation of a stage at once, bounded by its semaphore.
#[async_trait]
pub trait SkillInvoker: Send + Sync {
    /// Run one invocation. Errors are recorded as skill warnings.
    async fn invoke(&self, invocation: &SkillInvocation) -> Result<SkillOutputs>;
}

/// Adapts a synchronous closure into a [`SkillInvoker`].
pub struct FnSkillInvoker<F> {
    f: F,
}

impl<F> FnSkillInvoker<F>
where
    F: Fn(&SkillInvocation) -> Result<SkillOutputs> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> SkillInvoker for FnSkillInvoker<F>
where
    F: Fn(&SkillInvocation) -> Result<SkillOutputs> + Send + Sync,
{
    async fn invoke(&self, invocation: &SkillInvocation) -> Result<SkillOutputs> {
        (self.f)(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrichflow_shared::EnrichflowError;

    #[tokio::test]
    async fn fn_invoker_passes_invocation_through() {
        let invoker = FnSkillInvoker::new(|inv: &SkillInvocation| {
            if inv.skill_type != "echo" {
                return Err(EnrichflowError::skill(&inv.skill, inv.instance.to_string(), "unknown"));
            }
            let mut out = SkillOutputs::new();
            if let Some(text) = inv.inputs.get("text") {
                out.insert("echo".into(), text.clone());
            }
            Ok(out)
        });

        let mut inputs = SkillInputs::new();
        inputs.insert("text".into(), Value::from("hi"));
        let inv = SkillInvocation {
            skill: "echo-skill".into(),
            skill_type: "echo".into(),
            instance: FieldPath::root(),
            inputs,
        };
        let out = invoker.invoke(&inv).await.unwrap();
        assert_eq!(out.get("echo"), Some(&Value::from("hi")));

        let bad = SkillInvocation {
            skill_type: "other".into(),
            ..inv
        };
        assert!(invoker.invoke(&bad).await.is_err());
    }

    #[test]
    fn invocation_serializes_instance_as_path_string() {
        let inv = SkillInvocation {
            skill: "get-image-text".into(),
            skill_type: "ocr".into(),
            instance: FieldPath::root().child("normalized_images").index(0),
            inputs: SkillInputs::new(),
        };
        let json = serde_json::to_value(&inv).unwrap();
        assert_eq!(json["instance"], "/document/normalized_images/0");
        assert_eq!(json["inputs"], serde_json::json!({}));
    }
}
