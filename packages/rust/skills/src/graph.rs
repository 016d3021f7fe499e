//! Skill graph construction: validation, dependency edges, and stages.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::debug;

use enrichflow_document::{FieldPath, Segment};
use enrichflow_shared::{EnrichflowError, Result};

use crate::definition::{SkillDefinition, SkillKind};
use crate::merge;

/// A skill whose paths have been parsed and made absolute.
#[derive(Debug, Clone)]
pub struct CompiledSkill {
    definition: SkillDefinition,
    context: FieldPath,
    /// (input name, source as written, absolute source pattern)
    inputs: Vec<(String, FieldPath, FieldPath)>,
    /// (output name, relative target, absolute target pattern)
    outputs: Vec<(String, FieldPath, FieldPath)>,
}

impl CompiledSkill {
    fn compile(definition: SkillDefinition) -> Result<Self> {
        let name = definition.name.clone();
        let context = parse_for(&name, "context", &definition.context)?;
        validate_context(&name, &context)?;

        let mut inputs = Vec::with_capacity(definition.inputs.len());
        let mut seen = HashSet::new();
        for input in &definition.inputs {
            if !seen.insert(input.name.as_str()) {
                return Err(EnrichflowError::config(format!(
                    "skill '{name}' declares input '{}' twice",
                    input.name
                )));
            }
            let source = parse_for(&name, "input source", &input.source)?;
            let absolute = context.join(&source).to_absolute();
            if wildcard_count(&absolute) > 1 {
                return Err(EnrichflowError::config(format!(
                    "skill '{name}': input '{}' ({}) does not bind under context {context}; \
                     a relative source may not add another '*'",
                    input.name, input.source
                )));
            }
            inputs.push((input.name.clone(), source, absolute));
        }

        let mut outputs = Vec::with_capacity(definition.outputs.len());
        let mut seen = HashSet::new();
        for output in &definition.outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(EnrichflowError::config(format!(
                    "skill '{name}' declares output '{}' twice",
                    output.name
                )));
            }
            let target = parse_for(&name, "output target", output.target())?;
            if target.is_absolute() || target.has_wildcard() {
                return Err(EnrichflowError::config(format!(
                    "skill '{name}': output target '{}' must be a plain name relative to the context",
                    output.target()
                )));
            }
            let absolute = context.join(&target);
            outputs.push((output.name.clone(), target, absolute));
        }

        if let SkillKind::Merge { .. } = definition.kind {
            merge::validate(&definition)?;
        }

        Ok(Self {
            definition,
            context,
            inputs,
            outputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &SkillDefinition {
        &self.definition
    }

    pub fn kind(&self) -> &SkillKind {
        &self.definition.kind
    }

    pub fn context(&self) -> &FieldPath {
        &self.context
    }

    /// Inputs as `(name, source as written)`.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &FieldPath)> {
        self.inputs.iter().map(|(n, s, _)| (n.as_str(), s))
    }

    /// Outputs as `(name, relative target)`.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &FieldPath)> {
        self.outputs.iter().map(|(n, t, _)| (n.as_str(), t))
    }

    /// Absolute target patterns this skill writes.
    pub fn output_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.outputs.iter().map(|(_, _, p)| p)
    }

    /// The input source named `name`.
    pub fn input_source(&self, name: &str) -> Option<&FieldPath> {
        self.inputs
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, s, _)| s)
    }

    /// Whether this skill reads something `producer` writes, or runs over
    /// an array `producer` writes.
    fn depends_on(&self, producer: &CompiledSkill) -> bool {
        let reads_output = self.inputs.iter().any(|(_, _, input)| {
            producer.output_paths().any(|output| input.starts_with(output))
        });
        let context_array = self.context.parent().filter(|_| !self.context.is_root());
        let writes_context = context_array.is_some_and(|array| {
            producer.output_paths().any(|output| array.starts_with(output))
        });
        reads_output || writes_context
    }
}

fn parse_for(skill: &str, what: &str, raw: &str) -> Result<FieldPath> {
    FieldPath::parse(raw)
        .map_err(|e| EnrichflowError::config(format!("skill '{skill}': invalid {what}: {e}")))
}

fn wildcard_count(path: &FieldPath) -> usize {
    path.segments()
        .iter()
        .filter(|s| matches!(s, Segment::Wildcard))
        .count()
}

fn validate_context(skill: &str, context: &FieldPath) -> Result<()> {
    let ok = context.is_root()
        || (context.is_absolute()
            && context.segments().len() >= 2
            && context.wildcard_position() == Some(context.segments().len() - 1));
    if ok {
        Ok(())
    } else {
        Err(EnrichflowError::config(format!(
            "skill '{skill}': context '{context}' must be /document or /document/<path>/*"
        )))
    }
}

// ---------------------------------------------------------------------------
// SkillGraph
// ---------------------------------------------------------------------------

/// Validated skills with their dependency edges and execution stages.
#[derive(Debug, Clone)]
pub struct SkillGraph {
    skills: Vec<CompiledSkill>,
    /// `producers[i]`: indices of the skills skill `i` depends on.
    producers: Vec<Vec<usize>>,
    /// Layers of the topological order; declaration order within a layer.
    stages: Vec<Vec<usize>>,
    digest: String,
}

impl SkillGraph {
    /// Validate `definitions` and compute edges and stages.
    ///
    /// Rejects duplicate names, malformed paths and contexts, two skills
    /// writing the same path, and dependency cycles.
    pub fn build(definitions: Vec<SkillDefinition>) -> Result<Self> {
        let digest = digest_of(&definitions)?;

        let mut names = HashSet::new();
        for def in &definitions {
            if !names.insert(def.name.as_str()) {
                return Err(EnrichflowError::config(format!(
                    "duplicate skill name '{}'",
                    def.name
                )));
            }
        }

        let skills = definitions
            .into_iter()
            .map(CompiledSkill::compile)
            .collect::<Result<Vec<_>>>()?;

        let mut writers: HashMap<&FieldPath, &str> = HashMap::new();
        for skill in &skills {
            for path in skill.output_paths() {
                if let Some(other) = writers.insert(path, skill.name()) {
                    return Err(EnrichflowError::config(format!(
                        "skills '{other}' and '{}' both write {path}",
                        skill.name()
                    )));
                }
            }
        }

        let producers: Vec<Vec<usize>> = skills
            .iter()
            .map(|consumer| {
                skills
                    .iter()
                    .enumerate()
                    .filter(|(_, producer)| consumer.depends_on(producer))
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();

        for (i, deps) in producers.iter().enumerate() {
            if deps.contains(&i) {
                return Err(EnrichflowError::config(format!(
                    "skill '{}' depends on its own output",
                    skills[i].name()
                )));
            }
        }

        let stages = layer(&skills, &producers)?;
        debug!(skills = skills.len(), stages = stages.len(), %digest, "skill graph built");

        Ok(Self {
            skills,
            producers,
            stages,
            digest,
        })
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Skills in declaration order.
    pub fn skills(&self) -> &[CompiledSkill] {
        &self.skills
    }

    pub fn skill(&self, index: usize) -> Option<&CompiledSkill> {
        self.skills.get(index)
    }

    /// Stages as skill indices.
    pub fn stages(&self) -> &[Vec<usize>] {
        &self.stages
    }

    /// Stages as skill names.
    pub fn stage_names(&self) -> Vec<Vec<&str>> {
        self.stages
            .iter()
            .map(|stage| stage.iter().map(|&i| self.skills[i].name()).collect())
            .collect()
    }

    /// The flattened stage list: the order skills execute in.
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages
            .iter()
            .flatten()
            .map(|&i| self.skills[i].name())
            .collect()
    }

    /// Names of the skills `name` directly depends on.
    pub fn dependencies_of(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.skills.iter().position(|s| s.name() == name)?;
        Some(
            self.producers[index]
                .iter()
                .map(|&j| self.skills[j].name())
                .collect(),
        )
    }

    /// SHA-256 of the canonical JSON of the skill definitions, hex encoded.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Layered Kahn sort. Each pass takes, in declaration order, every skill whose
/// producers were all placed by earlier passes.
fn layer(skills: &[CompiledSkill], producers: &[Vec<usize>]) -> Result<Vec<Vec<usize>>> {
    let mut placed = vec![false; skills.len()];
    let mut remaining = skills.len();
    let mut stages = Vec::new();

    while remaining > 0 {
        let stage: Vec<usize> = (0..skills.len())
            .filter(|&i| !placed[i] && producers[i].iter().all(|&j| placed[j]))
            .collect();

        if stage.is_empty() {
            let stuck: Vec<&str> = (0..skills.len())
                .filter(|&i| !placed[i])
                .map(|i| skills[i].name())
                .collect();
            return Err(EnrichflowError::config(format!(
                "dependency cycle among skills: {}",
                stuck.join(", ")
            )));
        }

        for &i in &stage {
            placed[i] = true;
        }
        remaining -= stage.len();
        stages.push(stage);
    }

    Ok(stages)
}

fn digest_of(definitions: &[SkillDefinition]) -> Result<String> {
    let canonical = serde_json::to_vec(definitions)
        .map_err(|e| EnrichflowError::config(format!("failed to serialize skills: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn margies_skills() -> Vec<SkillDefinition> {
        vec![
            SkillDefinition::external("get-language", "language_detection")
                .input("text", "/document/content")
                .output("languageCode", "language"),
            SkillDefinition::external("get-image-descriptions", "image_analysis")
                .at("/document/normalized_images/*")
                .input("image", "/document/normalized_images/*")
                .output("description", "imageDescription"),
            SkillDefinition::external("get-image-text", "ocr")
                .at("/document/normalized_images/*")
                .input("image", "/document/normalized_images/*")
                .output("text", "text"),
            SkillDefinition::merge("merge-text", "[", "]")
                .input("text", "/document/content")
                .input("itemsToInsert", "/document/normalized_images/*/text")
                .input("offsets", "/document/normalized_images/*/contentOffset")
                .output("mergedText", "mergedText"),
            SkillDefinition::external("get-sentiment", "sentiment")
                .input("text", "/document/mergedText")
                .input("languageCode", "/document/language")
                .output("score", "sentimentScore"),
            SkillDefinition::external("get-text-entities", "entity_recognition")
                .input("text", "/document/mergedText")
                .input("languageCode", "/document/language")
                .output("locations", "locations")
                .output("urls", "urls"),
            SkillDefinition::external("get-key-phrases", "key_phrase_extraction")
                .input("text", "/document/mergedText")
                .input("languageCode", "/document/language")
                .output("keyPhrases", "keyPhrases"),
        ]
    }

    #[test]
    fn stages_follow_data_dependencies() {
        let graph = SkillGraph::build(margies_skills()).unwrap();
        assert_eq!(
            graph.stage_names(),
            vec![
                vec!["get-language", "get-image-descriptions", "get-image-text"],
                vec!["merge-text"],
                vec!["get-sentiment", "get-text-entities", "get-key-phrases"],
            ]
        );
        assert_eq!(
            graph.dependencies_of("get-sentiment").unwrap(),
            vec!["get-language", "merge-text"]
        );
        assert_eq!(graph.dependencies_of("merge-text").unwrap(), vec!["get-image-text"]);
    }

    #[test]
    fn order_is_stable_regardless_of_declaration_shuffle() {
        let mut skills = margies_skills();
        skills.reverse();
        let graph = SkillGraph::build(skills).unwrap();
        let order = graph.execution_order();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("get-image-text") < pos("merge-text"));
        assert!(pos("merge-text") < pos("get-key-phrases"));
        assert!(pos("get-language") < pos("get-sentiment"));
        // Reversed declaration order is kept inside a stage.
        assert_eq!(&order[..3], &["get-image-text", "get-image-descriptions", "get-language"]);
    }

    #[test]
    fn element_context_depends_on_array_writer() {
        let skills = vec![
            SkillDefinition::external("per-page", "summarize")
                .at("/document/pages/*")
                .input("text", "text")
                .output("summary", "summary"),
            SkillDefinition::external("split", "split_pages")
                .input("text", "/document/content")
                .output("pages", "pages"),
        ];
        let graph = SkillGraph::build(skills).unwrap();
        assert_eq!(graph.execution_order(), vec!["split", "per-page"]);
    }

    #[test]
    fn rejects_cycles() {
        let skills = vec![
            SkillDefinition::external("a", "t").input("x", "/document/b_out").output("o", "a_out"),
            SkillDefinition::external("b", "t").input("x", "/document/a_out").output("o", "b_out"),
        ];
        let err = SkillGraph::build(skills).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_self_dependency() {
        let skills = vec![
            SkillDefinition::external("loop", "t")
                .input("x", "/document/out")
                .output("o", "out"),
        ];
        let err = SkillGraph::build(skills).unwrap_err();
        assert!(err.to_string().contains("its own output"));
    }

    #[test]
    fn rejects_duplicate_names_and_outputs() {
        let dup_name = vec![
            SkillDefinition::external("a", "t").output("o", "x"),
            SkillDefinition::external("a", "t").output("o", "y"),
        ];
        assert!(SkillGraph::build(dup_name).unwrap_err().to_string().contains("duplicate skill name"));

        let dup_output = vec![
            SkillDefinition::external("a", "t").output("o", "language"),
            SkillDefinition::external("b", "t").output("o", "language"),
        ];
        let err = SkillGraph::build(dup_output).unwrap_err();
        assert!(err.to_string().contains("both write /document/language"));
    }

    #[test]
    fn rejects_bad_contexts_and_paths() {
        let not_element = vec![SkillDefinition::external("a", "t").at("/document/images")];
        assert!(SkillGraph::build(not_element).is_err());

        let relative = vec![SkillDefinition::external("a", "t").at("images/*")];
        assert!(SkillGraph::build(relative).is_err());

        let two_wildcards = vec![
            SkillDefinition::external("a", "t").input("x", "/document/a/*/b/*"),
        ];
        assert!(SkillGraph::build(two_wildcards).unwrap_err().is_config());

        let nested = vec![
            SkillDefinition::external("a", "t")
                .at("/document/images/*")
                .input("x", "lines/*"),
        ];
        assert!(SkillGraph::build(nested).unwrap_err().to_string().contains("does not bind"));

        let absolute_target = vec![SkillDefinition::external("a", "t").output("o", "/document/x")];
        assert!(SkillGraph::build(absolute_target).is_err());
    }

    #[test]
    fn digest_identifies_definitions() {
        let a = SkillGraph::build(margies_skills()).unwrap();
        let b = SkillGraph::build(margies_skills()).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);

        let mut changed = margies_skills();
        changed[0].outputs[0].target_name = Some("lang".into());
        let c = SkillGraph::build(changed).unwrap();
        assert_ne!(a.digest(), c.digest());
    }
}
