//! Per-document pipeline runs: source mappings, enrichment, output mappings.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, instrument, warn};

use enrichflow_document::Document;
use enrichflow_mapping::{
    FieldDefinition, FieldMapping, FieldWarning, IndexSchema, MappingTable, OutputRecord,
    ensure_key_mapped,
};
use enrichflow_shared::{EnrichflowError, FailureLimit, PipelineOptions, Result};
use enrichflow_skills::{
    FieldBudget, SkillDefinition, SkillGraph, SkillGraphExecutor, SkillInvoker, SkillWarning,
};

use crate::definition::PipelineDefinition;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A compiled, validated pipeline. Immutable once built.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: Option<String>,
    graph: Arc<SkillGraph>,
    source_mappings: MappingTable,
    output_mappings: MappingTable,
    schema: IndexSchema,
}

impl Pipeline {
    /// Compile and validate everything. Any problem is a configuration
    /// error, raised before a single document is processed.
    pub fn new(
        skills: Vec<SkillDefinition>,
        source_mappings: &[FieldMapping],
        output_mappings: &[FieldMapping],
        schema: Vec<FieldDefinition>,
    ) -> Result<Self> {
        let schema = IndexSchema::new(schema)?;
        let graph = SkillGraph::build(skills)?;
        let source_mappings = MappingTable::build(source_mappings, &schema)?;
        let output_mappings = MappingTable::build(output_mappings, &schema)?;
        ensure_key_mapped(&schema, &[&source_mappings, &output_mappings])?;

        Ok(Self {
            name: None,
            graph: Arc::new(graph),
            source_mappings,
            output_mappings,
            schema,
        })
    }

    pub fn from_definition(definition: &PipelineDefinition) -> Result<Self> {
        let mut pipeline = Self::new(
            definition.skills.clone(),
            &definition.field_mappings,
            &definition.output_field_mappings,
            definition.index.fields.clone(),
        )?;
        pipeline.name = definition.name.clone();
        Ok(pipeline)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn graph(&self) -> &SkillGraph {
        &self.graph
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Digest of the skill graph.
    pub fn digest(&self) -> &str {
        self.graph.digest()
    }
}

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// A raw document from a source provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Provider-supplied identifier, used until the key resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub body: serde_json::Value,
}

impl SourceDocument {
    pub fn new(body: serde_json::Value) -> Self {
        Self { id: None, body }
    }

    pub fn with_id(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            body,
        }
    }
}

/// A warning recorded against one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentWarning {
    pub document_id: String,
    #[serde(flatten)]
    pub detail: WarningDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningDetail {
    Skill(SkillWarning),
    Field(FieldWarning),
}

impl std::fmt::Display for DocumentWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            WarningDetail::Skill(w) => write!(f, "[{}] {w}", self.document_id),
            WarningDetail::Field(w) => write!(f, "[{}] {w}", self.document_id),
        }
    }
}

/// Why a document was excluded from the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// More failed field extractions than the per-document budget allows.
    FieldBudgetExceeded { failed: usize, limit: FailureLimit },
    /// The key field resolved to nothing or to an empty string.
    MissingKey { field: String },
    Cancelled,
    /// The body could not be read as a document.
    InvalidDocument { message: String },
    /// The run itself broke down (e.g. an invocation task panicked).
    Execution { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldBudgetExceeded { failed, limit } => {
                write!(f, "{failed} field failures exceed the limit of {limit}")
            }
            Self::MissingKey { field } => write!(f, "key field '{field}' is missing or empty"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::InvalidDocument { message } => write!(f, "invalid document: {message}"),
            Self::Execution { message } => write!(f, "execution failed: {message}"),
        }
    }
}

/// A failed document, as recorded in batch statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub document_id: String,
    /// Position in the batch input.
    pub position: usize,
    #[serde(flatten)]
    pub reason: FailureReason,
    /// Warnings gathered before the document failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DocumentWarning>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Succeeded(OutputRecord),
    PartiallyFailed {
        record: OutputRecord,
        warnings: Vec<DocumentWarning>,
    },
    Failed(DocumentFailure),
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub document_id: String,
    pub position: usize,
    pub outcome: DocumentOutcome,
}

impl PipelineResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, DocumentOutcome::Failed(_))
    }

    pub fn record(&self) -> Option<&OutputRecord> {
        match &self.outcome {
            DocumentOutcome::Succeeded(record) | DocumentOutcome::PartiallyFailed { record, .. } => {
                Some(record)
            }
            DocumentOutcome::Failed(_) => None,
        }
    }

    pub fn warnings(&self) -> &[DocumentWarning] {
        match &self.outcome {
            DocumentOutcome::Succeeded(_) => &[],
            DocumentOutcome::PartiallyFailed { warnings, .. } => warnings,
            DocumentOutcome::Failed(failure) => &failure.warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs documents through one pipeline with fixed options.
///
/// Clones share the skill-invocation semaphore.
#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    executor: SkillGraphExecutor,
    options: PipelineOptions,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<Pipeline>, invoker: Arc<dyn SkillInvoker>, options: PipelineOptions) -> Self {
        let limiter = Arc::new(Semaphore::new(options.concurrency_limit.max(1)));
        Self::with_limiter(pipeline, invoker, options, limiter)
    }

    pub fn with_limiter(
        pipeline: Arc<Pipeline>,
        invoker: Arc<dyn SkillInvoker>,
        options: PipelineOptions,
        limiter: Arc<Semaphore>,
    ) -> Self {
        let executor = SkillGraphExecutor::with_limiter(Arc::clone(&pipeline.graph), invoker, limiter);
        Self {
            pipeline,
            executor,
            options,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run one document. Never returns an error: every problem is folded
    /// into the outcome.
    pub async fn run(
        &self,
        source: SourceDocument,
        position: usize,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let provisional_id = source.id.clone().unwrap_or_else(|| position.to_string());
        let span = info_span!("document", position, document_id = %provisional_id);
        self.run_inner(source, provisional_id, position, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        source: SourceDocument,
        provisional_id: String,
        position: usize,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let mut run = Run {
            document_id: provisional_id,
            position,
            budget: FieldBudget::new(self.options.max_failed_fields_per_document),
            warnings: Vec::new(),
        };
        let pipeline = &*self.pipeline;

        let document = match Document::from_json(source.body) {
            Ok(document) => document,
            Err(e) => {
                return run.fail(FailureReason::InvalidDocument {
                    message: e.to_string(),
                });
            }
        };

        // Source mappings see the raw document.
        let mut record = OutputRecord::new();
        let field_warnings = pipeline.source_mappings.project(&document, &mut record);
        if let Some(key) = record.key(&pipeline.schema) {
            run.document_id = key.to_string();
        }
        if run.record_fields(field_warnings) {
            return run.budget_exceeded();
        }

        if cancel.is_cancelled() {
            return run.fail(FailureReason::Cancelled);
        }

        let report = match self.executor.execute(document, &mut run.budget, cancel).await {
            Ok(report) => report,
            Err(EnrichflowError::Cancelled) => return run.fail(FailureReason::Cancelled),
            Err(e) => {
                return run.fail(FailureReason::Execution {
                    message: e.to_string(),
                });
            }
        };
        let budget_exceeded = report.budget_exceeded;
        run.record_skills(report.warnings);
        if budget_exceeded {
            return run.budget_exceeded();
        }

        // Output mappings win over source mappings for the same target.
        let field_warnings = pipeline.output_mappings.project(&report.document, &mut record);
        if run.record_fields(field_warnings) {
            return run.budget_exceeded();
        }

        record.conform_to(&pipeline.schema);
        match record.key(&pipeline.schema) {
            Some(key) => run.document_id = key.to_string(),
            None => {
                return run.fail(FailureReason::MissingKey {
                    field: pipeline.schema.key_field().name.clone(),
                });
            }
        }

        let outcome = if run.warnings.is_empty() {
            DocumentOutcome::Succeeded(record)
        } else {
            DocumentOutcome::PartiallyFailed {
                record,
                warnings: std::mem::take(&mut run.warnings),
            }
        };
        debug!(document_id = %run.document_id, "document enriched");
        PipelineResult {
            document_id: run.document_id,
            position,
            outcome,
        }
    }
}

/// Mutable state of one run.
struct Run {
    document_id: String,
    position: usize,
    budget: FieldBudget,
    warnings: Vec<DocumentWarning>,
}

impl Run {
    /// Record field warnings; returns whether the budget is now exceeded.
    fn record_fields(&mut self, warnings: Vec<FieldWarning>) -> bool {
        let mut exceeded = false;
        for warning in warnings {
            warn!(
                document_id = %self.document_id,
                target = %warning.target,
                source = %warning.source,
                error = %warning.message,
                "field mapping failed"
            );
            exceeded |= self.budget.record_failure();
            self.warnings.push(DocumentWarning {
                document_id: self.document_id.clone(),
                detail: WarningDetail::Field(warning),
            });
        }
        exceeded
    }

    /// Skill warnings were already counted by the executor.
    fn record_skills(&mut self, warnings: Vec<SkillWarning>) {
        self.warnings
            .extend(warnings.into_iter().map(|warning| DocumentWarning {
                document_id: self.document_id.clone(),
                detail: WarningDetail::Skill(warning),
            }));
    }

    fn budget_exceeded(self) -> PipelineResult {
        let reason = FailureReason::FieldBudgetExceeded {
            failed: self.budget.failed(),
            limit: self.budget.limit(),
        };
        self.fail(reason)
    }

    fn fail(self, reason: FailureReason) -> PipelineResult {
        warn!(document_id = %self.document_id, position = self.position, %reason, "document failed");
        PipelineResult {
            document_id: self.document_id.clone(),
            position: self.position,
            outcome: DocumentOutcome::Failed(DocumentFailure {
                document_id: self.document_id,
                position: self.position,
                reason,
                warnings: self.warnings,
            }),
        }
    }
}

/// Run a single document through `pipeline`.
#[instrument(skip_all, fields(pipeline = pipeline.name().unwrap_or_default(), digest = %pipeline.digest()))]
pub async fn run_pipeline(
    document: SourceDocument,
    pipeline: Arc<Pipeline>,
    invoker: Arc<dyn SkillInvoker>,
    options: PipelineOptions,
    cancel: &CancellationToken,
) -> PipelineResult {
    PipelineRunner::new(pipeline, invoker, options)
        .run(document, 0, cancel)
        .await
}
