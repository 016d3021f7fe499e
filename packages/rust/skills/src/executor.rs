//! Stage-wise skill graph execution over one document.
//!
//! Every invocation of a stage runs concurrently against the document as it
//! stood when the stage began. Writes are applied once the whole stage has
//! finished, in declaration order and then instance order, so the enriched
//! document never depends on task timing.
//!
//! Skills only add annotations: an invocation's writes land all together or
//! not at all, and a field of the source document is never overwritten.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use enrichflow_document::{Document, FieldPath, Value};
use enrichflow_shared::{EnrichflowError, FailureLimit, Result};

use crate::definition::SkillKind;
use crate::graph::{CompiledSkill, SkillGraph};
use crate::invoker::{SkillInputs, SkillInvocation, SkillInvoker, SkillOutputs};
use crate::merge;

/// A recorded, tolerated skill failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillWarning {
    pub skill: String,
    /// Context instance the invocation ran against.
    pub instance: String,
    pub message: String,
}

impl std::fmt::Display for SkillWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "skill '{}' at {}: {}", self.skill, self.instance, self.message)
    }
}

/// Per-document count of failed field extractions against its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBudget {
    limit: FailureLimit,
    failed: usize,
}

impl FieldBudget {
    pub fn new(limit: FailureLimit) -> Self {
        Self { limit, failed: 0 }
    }

    /// Count one failure; returns whether the budget is now exceeded.
    pub fn record_failure(&mut self) -> bool {
        self.failed += 1;
        self.is_exceeded()
    }

    pub fn is_exceeded(&self) -> bool {
        self.limit.is_exceeded_by(self.failed)
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn limit(&self) -> FailureLimit {
        self.limit
    }
}

/// Outcome of running a skill graph over one document.
#[derive(Debug, Clone)]
pub struct EnrichmentReport {
    /// The annotated document (partial if the budget ran out).
    pub document: Document,
    pub warnings: Vec<SkillWarning>,
    /// Invocations attempted, merge included.
    pub invocations: usize,
    /// Execution stopped because the field budget was exceeded.
    pub budget_exceeded: bool,
}

/// One skill against one context instance.
#[derive(Debug, Clone)]
struct Task {
    skill: usize,
    instance: FieldPath,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs a [`SkillGraph`] through a [`SkillInvoker`].
#[derive(Clone)]
pub struct SkillGraphExecutor {
    graph: Arc<SkillGraph>,
    invoker: Arc<dyn SkillInvoker>,
    limiter: Arc<Semaphore>,
}

impl SkillGraphExecutor {
    /// Executor with its own limit of `concurrency_limit` in-flight invocations.
    pub fn new(
        graph: Arc<SkillGraph>,
        invoker: Arc<dyn SkillInvoker>,
        concurrency_limit: usize,
    ) -> Self {
        Self::with_limiter(graph, invoker, Arc::new(Semaphore::new(concurrency_limit.max(1))))
    }

    /// Executor sharing `limiter` with other executors (one per batch).
    pub fn with_limiter(
        graph: Arc<SkillGraph>,
        invoker: Arc<dyn SkillInvoker>,
        limiter: Arc<Semaphore>,
    ) -> Self {
        Self {
            graph,
            invoker,
            limiter,
        }
    }

    pub fn graph(&self) -> &SkillGraph {
        &self.graph
    }

    /// Run every stage over `document`.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires; the partial document is
    /// dropped. A failed invocation is recorded as a warning and counted
    /// against `budget`; once the budget is exceeded execution stops and the
    /// report is flagged. An invocation whose writes cannot all be applied
    /// counts as one failure and writes nothing.
    #[instrument(skip_all, fields(skills = self.graph.len(), stages = self.graph.stages().len()))]
    pub async fn execute(
        &self,
        mut document: Document,
        budget: &mut FieldBudget,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentReport> {
        let mut warnings = Vec::new();
        let mut invocations = 0;
        let source = document.clone();

        if budget.is_exceeded() {
            return Ok(EnrichmentReport {
                document,
                warnings,
                invocations,
                budget_exceeded: true,
            });
        }

        for (stage_no, stage) in self.graph.stages().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EnrichflowError::Cancelled);
            }

            let tasks = plan(&self.graph, stage, &document);
            debug!(stage = stage_no, invocations = tasks.len(), "running stage");
            let results = self.run_stage(&tasks, &document, cancel).await?;
            if cancel.is_cancelled() {
                return Err(EnrichflowError::Cancelled);
            }

            for (task, result) in tasks.iter().zip(results) {
                let skill = &self.graph.skills()[task.skill];
                invocations += 1;

                let applied = result
                    .and_then(|outputs| declared_writes(skill, outputs, &task.instance))
                    .and_then(|writes| apply_writes(&mut document, &source, skill, &task.instance, writes));

                if let Err(error) = applied {
                    let warning = to_warning(skill, &task.instance, error);
                    warn!(
                        skill = %warning.skill,
                        instance = %warning.instance,
                        error = %warning.message,
                        "skill invocation failed"
                    );
                    warnings.push(warning);

                    if budget.record_failure() {
                        warn!(
                            failed = budget.failed(),
                            limit = %budget.limit(),
                            "field failure budget exceeded, stopping enrichment"
                        );
                        return Ok(EnrichmentReport {
                            document,
                            warnings,
                            invocations,
                            budget_exceeded: true,
                        });
                    }
                }
            }
        }

        Ok(EnrichmentReport {
            document,
            warnings,
            invocations,
            budget_exceeded: false,
        })
    }

    /// Run every task of a stage; results come back in task order.
    async fn run_stage(
        &self,
        tasks: &[Task],
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<SkillOutputs>>> {
        let mut results: Vec<Option<Result<SkillOutputs>>> = tasks.iter().map(|_| None).collect();
        let mut set = JoinSet::new();
        let mut task_ids = HashMap::new();

        for (i, task) in tasks.iter().enumerate() {
            let skill = &self.graph.skills()[task.skill];
            let skill_type = match skill.kind() {
                SkillKind::Merge { .. } => {
                    results[i] = Some(merge::run(skill, document, &task.instance));
                    continue;
                }
                SkillKind::External { skill_type } => skill_type.clone(),
            };

            let invocation = SkillInvocation {
                skill: skill.name().to_string(),
                skill_type,
                instance: task.instance.clone(),
                inputs: bind_inputs(skill, document, &task.instance),
            };
            let invoker = Arc::clone(&self.invoker);
            let limiter = Arc::clone(&self.limiter);
            let cancel = cancel.clone();

            let handle = set.spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(EnrichflowError::Cancelled),
                    permit = limiter.acquire_owned() => match permit {
                        Ok(_permit) if cancel.is_cancelled() => Err(EnrichflowError::Cancelled),
                        Ok(_permit) => {
                            debug!(
                                skill = %invocation.skill,
                                instance = %invocation.instance,
                                inputs = invocation.inputs.len(),
                                "invoking skill"
                            );
                            invoker.invoke(&invocation).await
                        }
                        Err(_) => Err(EnrichflowError::invalid_state("skill limiter closed")),
                    },
                };
                (i, outcome)
            });
            task_ids.insert(handle.id(), i);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(EnrichflowError::Cancelled),
                joined = set.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((_, (i, outcome)))) => results[i] = Some(outcome),
                    Some(Err(e)) => {
                        if let Some(&i) = task_ids.get(&e.id()) {
                            let skill = self.graph.skills()[tasks[i].skill].name();
                            results[i] = Some(Err(EnrichflowError::skill(
                                skill,
                                tasks[i].instance.to_string(),
                                format!("invocation task failed: {e}"),
                            )));
                        }
                    }
                },
            }
        }

        Ok(results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(EnrichflowError::invalid_state("invocation produced no result")))
            })
            .collect())
    }
}

/// Tasks of one stage, in declaration order and then instance order.
///
/// Array membership is read now, after every earlier stage has written.
fn plan(graph: &SkillGraph, stage: &[usize], document: &Document) -> Vec<Task> {
    stage
        .iter()
        .flat_map(|&skill| {
            document
                .instances(graph.skills()[skill].context())
                .into_iter()
                .map(move |instance| Task { skill, instance })
        })
        .collect()
}

/// Resolve a skill's inputs for one instance.
///
/// A path still holding `*` after binding is collected into a sequence;
/// otherwise the single value is used, and absent inputs are left out.
fn bind_inputs(skill: &CompiledSkill, document: &Document, instance: &FieldPath) -> SkillInputs {
    let mut inputs = SkillInputs::new();
    for (name, source) in skill.inputs() {
        let bound = source.bind(skill.context(), instance);
        let values = document.get(&bound);
        if bound.has_wildcard() {
            inputs.insert(
                name.to_string(),
                Value::Sequence(values.into_iter().cloned().collect()),
            );
        } else if let Some(value) = values.into_iter().next() {
            inputs.insert(name.to_string(), value.clone());
        }
    }
    inputs
}

/// Pick the declared outputs out of a response. A missing declared output
/// makes the whole response malformed; undeclared outputs are ignored.
fn declared_writes(
    skill: &CompiledSkill,
    mut outputs: SkillOutputs,
    instance: &FieldPath,
) -> Result<Vec<(FieldPath, Value)>> {
    let writes = skill
        .outputs()
        .map(|(name, target)| {
            let value = outputs.swap_remove(name).ok_or_else(|| {
                EnrichflowError::skill(
                    skill.name(),
                    instance.to_string(),
                    format!("malformed response: missing declared output '{name}'"),
                )
            })?;
            Ok((instance.join(target), value))
        })
        .collect::<Result<Vec<_>>>()?;

    if !outputs.is_empty() {
        debug!(skill = skill.name(), ignored = outputs.len(), "ignoring undeclared outputs");
    }
    Ok(writes)
}

/// Apply one invocation's writes to a staged copy and commit them only if
/// every write succeeds.
fn apply_writes(
    document: &mut Document,
    source: &Document,
    skill: &CompiledSkill,
    instance: &FieldPath,
    writes: Vec<(FieldPath, Value)>,
) -> Result<()> {
    if let Some((target, _)) = writes.iter().find(|(target, _)| !source.get(target).is_empty()) {
        return Err(EnrichflowError::skill(
            skill.name(),
            instance.to_string(),
            format!("output would overwrite source field {target}"),
        ));
    }

    let mut staged = document.clone();
    for (target, value) in writes {
        staged.set(&target, value)?;
    }
    *document = staged;
    Ok(())
}

fn to_warning(skill: &CompiledSkill, instance: &FieldPath, error: EnrichflowError) -> SkillWarning {
    match error {
        EnrichflowError::SkillInvocation {
            skill,
            instance,
            message,
        } => SkillWarning {
            skill,
            instance,
            message,
        },
        other => SkillWarning {
            skill: skill.name().to_string(),
            instance: instance.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::definition::SkillDefinition;
    use crate::graph::tests::margies_skills;
    use crate::invoker::FnSkillInvoker;

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    /// Deterministic stand-ins for the external skills of the demo graph.
    fn fake_skills(inv: &SkillInvocation) -> Result<SkillOutputs> {
        let text = |name: &str| {
            inv.inputs
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let mut out = SkillOutputs::new();
        match inv.skill_type.as_str() {
            "language_detection" => {
                out.insert("languageCode".into(), Value::from("en"));
            }
            "image_analysis" => {
                out.insert("description".into(), Value::from(format!("photo {}", inv.instance)));
            }
            "ocr" => {
                let ocr = inv
                    .inputs
                    .get("image")
                    .and_then(Value::as_node)
                    .and_then(|image| image.field("ocr"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| EnrichflowError::skill(&inv.skill, inv.instance.to_string(), "unreadable image"))?;
                out.insert("text".into(), Value::from(ocr));
            }
            "sentiment" => {
                let score = if text("text").contains("beach") { 0.9 } else { 0.5 };
                out.insert("score".into(), Value::from(score));
            }
            "entity_recognition" => {
                out.insert("locations".into(), Value::from(vec!["Paris"]));
                out.insert("urls".into(), Value::from(Vec::<String>::new()));
                out.insert("persons".into(), Value::from(vec!["ignored"]));
            }
            "key_phrase_extraction" => {
                let phrases: Vec<String> = text("text")
                    .split_whitespace()
                    .filter(|w| w.len() > 4)
                    .map(str::to_string)
                    .collect();
                out.insert("keyPhrases".into(), Value::from(phrases));
            }
            other => {
                return Err(EnrichflowError::skill(&inv.skill, inv.instance.to_string(), format!("no such skill type {other}")));
            }
        }
        Ok(out)
    }

    fn brochure() -> Document {
        Document::from_json(json!({
            "content": "Visit the beach",
            "normalized_images": [
                {"contentOffset": 5, "ocr": "SUNNY"},
                {"contentOffset": 15, "ocr": "HOTEL"}
            ]
        }))
        .unwrap()
    }

    fn executor_with<I: SkillInvoker + 'static>(invoker: I, limit: usize) -> SkillGraphExecutor {
        let graph = Arc::new(SkillGraph::build(margies_skills()).unwrap());
        SkillGraphExecutor::new(graph, Arc::new(invoker), limit)
    }

    #[tokio::test]
    async fn enriches_document_through_all_stages() {
        let executor = executor_with(FnSkillInvoker::new(fake_skills), 4);
        let mut budget = FieldBudget::new(FailureLimit::Limited(0));
        let report = executor
            .execute(brochure(), &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.warnings.is_empty());
        assert!(!report.budget_exceeded);
        // 1 language + 2 x 2 image skills + merge + 3 text skills
        assert_eq!(report.invocations, 9);

        let doc = &report.document;
        assert_eq!(doc.get(&p("/document/language")), vec![&Value::from("en")]);
        assert_eq!(
            doc.get(&p("/document/mergedText")),
            vec![&Value::from("Visit[SUNNY] the beach[HOTEL]")]
        );
        assert_eq!(doc.get(&p("/document/normalized_images/*/text")).len(), 2);
        assert_eq!(
            doc.get(&p("/document/normalized_images/1/imageDescription")),
            vec![&Value::from("photo /document/normalized_images/1")]
        );
        // Sentiment saw the merged text, so it ran after the merge.
        assert_eq!(doc.get(&p("/document/sentimentScore")), vec![&Value::Float(0.9)]);
        assert_eq!(
            doc.get(&p("/document/keyPhrases/*")),
            vec![&Value::from("Visit[SUNNY]"), &Value::from("beach[HOTEL]")]
        );
        // Undeclared outputs are dropped; source fields are untouched.
        assert!(doc.get(&p("/document/persons")).is_empty());
        assert_eq!(doc.get(&p("/document/content")), vec![&Value::from("Visit the beach")]);
    }

    #[tokio::test]
    async fn failed_element_invocation_is_a_warning() {
        let executor = executor_with(FnSkillInvoker::new(fake_skills), 4);
        let mut doc = brochure();
        doc.set(&p("/document/normalized_images/0/ocr"), Value::Integer(1)).unwrap();

        let mut budget = FieldBudget::new(FailureLimit::Unlimited);
        let report = executor
            .execute(doc, &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.warnings.len(), 1);
        let warning = &report.warnings[0];
        assert_eq!(warning.skill, "get-image-text");
        assert_eq!(warning.instance, "/document/normalized_images/0");
        assert_eq!(budget.failed(), 1);

        // The failed element contributes nothing; the rest still merge.
        assert_eq!(
            report.document.get(&p("/document/mergedText")),
            vec![&Value::from("Visit the beach[HOTEL]")]
        );
        assert!(report.document.get(&p("/document/normalized_images/0/text")).is_empty());
    }

    #[tokio::test]
    async fn exceeding_the_field_budget_stops_execution() {
        let executor = executor_with(FnSkillInvoker::new(fake_skills), 4);
        let mut doc = brochure();
        doc.set(&p("/document/normalized_images/0/ocr"), Value::Integer(1)).unwrap();

        let mut budget = FieldBudget::new(FailureLimit::Limited(0));
        let report = executor
            .execute(doc, &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.budget_exceeded);
        assert!(report.document.get(&p("/document/mergedText")).is_empty());
    }

    #[tokio::test]
    async fn missing_declared_output_is_malformed() {
        let graph = Arc::new(
            SkillGraph::build(vec![
                SkillDefinition::external("entities", "ner")
                    .input("text", "/document/content")
                    .output("locations", "locations")
                    .output("urls", "links"),
            ])
            .unwrap(),
        );
        let invoker = FnSkillInvoker::new(|_: &SkillInvocation| {
            let mut out = SkillOutputs::new();
            out.insert("locations".into(), Value::from(vec!["Rome"]));
            Ok(out)
        });
        let executor = SkillGraphExecutor::new(graph, Arc::new(invoker), 1);

        let mut budget = FieldBudget::new(FailureLimit::Unlimited);
        let report = executor
            .execute(brochure(), &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("missing declared output 'urls'"));
        // None of the invocation's outputs were written.
        assert!(report.document.get(&p("/document/locations")).is_empty());
    }

    #[tokio::test]
    async fn absent_inputs_are_omitted_and_open_wildcards_collected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let graph = Arc::new(
            SkillGraph::build(vec![
                SkillDefinition::external("probe", "probe")
                    .input("author", "/document/metadata_author")
                    .input("offsets", "/document/normalized_images/*/contentOffset")
                    .output("ok", "probed"),
            ])
            .unwrap(),
        );
        let invoker = FnSkillInvoker::new(move |inv: &SkillInvocation| {
            record.lock().unwrap().push(inv.inputs.clone());
            let mut out = SkillOutputs::new();
            out.insert("ok".into(), Value::Boolean(true));
            Ok(out)
        });
        let executor = SkillGraphExecutor::new(graph, Arc::new(invoker), 1);
        let mut budget = FieldBudget::new(FailureLimit::Limited(0));
        executor
            .execute(brochure(), &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].contains_key("author"));
        assert_eq!(
            seen[0].get("offsets"),
            Some(&Value::from(vec![Value::Integer(5), Value::Integer(15)]))
        );
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_run() {
        let executor = executor_with(FnSkillInvoker::new(fake_skills), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut budget = FieldBudget::new(FailureLimit::Limited(0));
        let err = executor
            .execute(brochure(), &mut budget, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichflowError::Cancelled));
    }

    #[tokio::test]
    async fn outputs_never_overwrite_source_fields() {
        let graph = Arc::new(
            SkillGraph::build(vec![
                SkillDefinition::external("rewrite", "rewrite")
                    .input("title", "/document/title")
                    .output("out", "content"),
                SkillDefinition::external("echo", "echo")
                    .input("text", "/document/content")
                    .output("copy", "echoed"),
            ])
            .unwrap(),
        );
        let invoker = FnSkillInvoker::new(|inv: &SkillInvocation| {
            let mut out = SkillOutputs::new();
            match inv.skill.as_str() {
                "rewrite" => out.insert("out".into(), Value::from("REPLACED")),
                _ => {
                    let text = inv.inputs.get("text").cloned().unwrap_or_else(|| Value::from(""));
                    out.insert("copy".into(), text)
                }
            };
            Ok(out)
        });
        let executor = SkillGraphExecutor::new(graph, Arc::new(invoker), 2);
        let doc = Document::from_json(json!({"content": "original source text"})).unwrap();

        let mut budget = FieldBudget::new(FailureLimit::Unlimited);
        let report = executor
            .execute(doc, &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].skill, "rewrite");
        assert!(report.warnings[0].message.contains("overwrite source field /document/content"));
        assert_eq!(budget.failed(), 1);
        let original = Value::from("original source text");
        assert_eq!(report.document.get(&p("/document/content")), vec![&original]);
        assert_eq!(report.document.get(&p("/document/echoed")), vec![&original]);
    }

    #[tokio::test]
    async fn failed_write_discards_the_whole_invocation() {
        let graph = Arc::new(
            SkillGraph::build(vec![
                SkillDefinition::external("two", "two")
                    .input("text", "/document/content")
                    .output("a", "annotation")
                    .output("b", "content/sub"),
            ])
            .unwrap(),
        );
        let invoker = FnSkillInvoker::new(|_: &SkillInvocation| {
            let mut out = SkillOutputs::new();
            out.insert("a".into(), Value::from("kept?"));
            out.insert("b".into(), Value::from("nested"));
            Ok(out)
        });
        let executor = SkillGraphExecutor::new(graph, Arc::new(invoker), 1);

        let mut budget = FieldBudget::new(FailureLimit::Unlimited);
        let report = executor
            .execute(brochure(), &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(budget.failed(), 1);
        assert!(report.document.get(&p("/document/annotation")).is_empty());
        assert_eq!(
            report.document.get(&p("/document/content")),
            vec![&Value::from("Visit the beach")]
        );
    }

    struct SlowInvoker {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SkillInvoker for SlowInvoker {
        async fn invoke(&self, _invocation: &SkillInvocation) -> Result<SkillOutputs> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let mut out = SkillOutputs::new();
            out.insert("text".into(), Value::from("t"));
            Ok(out)
        }
    }

    #[tokio::test]
    async fn semaphore_bounds_in_flight_invocations() {
        let graph = Arc::new(
            SkillGraph::build(vec![
                SkillDefinition::external("ocr", "ocr")
                    .at("/document/pages/*")
                    .input("image", "/document/pages/*")
                    .output("text", "text"),
            ])
            .unwrap(),
        );
        let invoker = Arc::new(SlowInvoker {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = SkillGraphExecutor::new(graph, invoker.clone(), 2);

        let pages: Vec<Value> = (0..6).map(|i| Value::from(json_page(i))).collect();
        let mut doc = Document::new();
        doc.insert("pages", Value::Sequence(pages));

        let mut budget = FieldBudget::new(FailureLimit::Limited(0));
        let report = executor
            .execute(doc, &mut budget, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.document.get(&p("/document/pages/*/text")).len(), 6);
        assert!(invoker.peak.load(Ordering::SeqCst) <= 2);
    }

    fn json_page(i: i64) -> Document {
        let mut page = Document::new();
        page.insert("number", i);
        page
    }
}
