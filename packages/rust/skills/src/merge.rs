//! Built-in text merge skill.
//!
//! Inserts per-element text fragments (typically OCR output) into a base
//! text at their character offsets, wrapping each in the configured tags.

use std::collections::HashMap;

use enrichflow_document::{Document, FieldPath, Value};
use enrichflow_shared::{EnrichflowError, Result};

use crate::definition::{SkillDefinition, SkillKind};
use crate::graph::CompiledSkill;
use crate::invoker::SkillOutputs;

pub const INPUT_TEXT: &str = "text";
pub const INPUT_ITEMS: &str = "itemsToInsert";
pub const INPUT_OFFSETS: &str = "offsets";
pub const OUTPUT_MERGED_TEXT: &str = "mergedText";

/// A fragment to insert. `offset` counts characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFragment {
    pub text: String,
    pub offset: Option<usize>,
}

/// Insert `fragments` into `base`.
///
/// Fragments go in ascending offset order; equal offsets keep their given
/// order. Offsets past the end clamp to the end, and fragments without an
/// offset are appended.
pub fn merge_text(base: &str, fragments: &[MergeFragment], pre_tag: &str, post_tag: &str) -> String {
    let chars: Vec<char> = base.chars().collect();
    let len = chars.len();

    let mut placed: Vec<(usize, &str)> = fragments
        .iter()
        .map(|f| (f.offset.map_or(len, |o| o.min(len)), f.text.as_str()))
        .collect();
    placed.sort_by_key(|(offset, _)| *offset);

    let extra: usize = placed
        .iter()
        .map(|(_, t)| t.len() + pre_tag.len() + post_tag.len())
        .sum();
    let mut out = String::with_capacity(base.len() + extra);
    let mut cursor = 0;
    for (offset, text) in placed {
        out.extend(&chars[cursor..offset]);
        cursor = offset;
        out.push_str(pre_tag);
        out.push_str(text);
        out.push_str(post_tag);
    }
    out.extend(&chars[cursor..]);
    out
}

pub(crate) fn validate(definition: &SkillDefinition) -> Result<()> {
    let name = &definition.name;
    for input in &definition.inputs {
        if ![INPUT_TEXT, INPUT_ITEMS, INPUT_OFFSETS].contains(&input.name.as_str()) {
            return Err(EnrichflowError::config(format!(
                "merge skill '{name}': unknown input '{}' (expected {INPUT_TEXT}, {INPUT_ITEMS} or {INPUT_OFFSETS})",
                input.name
            )));
        }
    }
    if !definition.inputs.iter().any(|i| i.name == INPUT_ITEMS) {
        return Err(EnrichflowError::config(format!(
            "merge skill '{name}' needs an '{INPUT_ITEMS}' input"
        )));
    }
    match definition.outputs.as_slice() {
        [only] if only.name == OUTPUT_MERGED_TEXT => Ok(()),
        _ => Err(EnrichflowError::config(format!(
            "merge skill '{name}' must declare exactly one output, '{OUTPUT_MERGED_TEXT}'"
        ))),
    }
}

/// Run the merge for one context instance against the stage snapshot.
pub(crate) fn run(skill: &CompiledSkill, doc: &Document, instance: &FieldPath) -> Result<SkillOutputs> {
    let SkillKind::Merge {
        insert_pre_tag,
        insert_post_tag,
    } = skill.kind()
    else {
        return Err(EnrichflowError::invalid_state(format!(
            "skill '{}' is not a merge skill",
            skill.name()
        )));
    };

    let malformed = |msg: String| EnrichflowError::skill(skill.name(), instance.to_string(), msg);
    let bound = |input: &str| {
        skill
            .input_source(input)
            .map(|source| source.bind(skill.context(), instance))
    };

    let base = match bound(INPUT_TEXT).as_ref().and_then(|p| doc.get(p).into_iter().next()) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(malformed(format!(
                "'{INPUT_TEXT}' is a {}, expected text",
                other.kind_name()
            )));
        }
        None => String::new(),
    };

    let offsets: Option<HashMap<usize, &Value>> = bound(INPUT_OFFSETS)
        .map(|path| keyed(doc, &path).into_iter().collect());

    let mut fragments = Vec::new();
    if let Some(path) = bound(INPUT_ITEMS) {
        for (element, value) in keyed(doc, &path) {
            let Some(text) = value.as_str() else {
                return Err(malformed(format!(
                    "'{INPUT_ITEMS}' element {element} is a {}, expected text",
                    value.kind_name()
                )));
            };
            let offset = match offsets.as_ref().and_then(|o| o.get(&element)) {
                None => None,
                Some(raw) => Some(raw.as_i64().ok_or_else(|| {
                    malformed(format!(
                        "'{INPUT_OFFSETS}' element {element} is not an integer offset"
                    ))
                })?),
            };
            fragments.push(MergeFragment {
                text: text.to_string(),
                offset: offset.map(|o| o.max(0) as usize),
            });
        }
    }

    let merged = merge_text(&base, &fragments, insert_pre_tag, insert_post_tag);
    let mut outputs = SkillOutputs::new();
    outputs.insert(OUTPUT_MERGED_TEXT.to_string(), Value::String(merged));
    Ok(outputs)
}

/// Values at `path` keyed by element index, so fragments and offsets pair up
/// by element rather than by list position.
fn keyed<'a>(doc: &'a Document, path: &FieldPath) -> Vec<(usize, &'a Value)> {
    match path.wildcard_position() {
        Some(at) => doc
            .resolve(path)
            .into_iter()
            .enumerate()
            .map(|(n, (instance, value))| (instance.index_at(at).unwrap_or(n), value))
            .collect(),
        None => match doc.get(path).into_iter().next() {
            Some(Value::Sequence(items)) => items.iter().enumerate().collect(),
            Some(scalar) => vec![(0, scalar)],
            None => Vec::new(),
        },
    }
}
