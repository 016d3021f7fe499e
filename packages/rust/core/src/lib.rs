//! Pipeline controller for Enrichflow.
//!
//! Ties the document model, skill graph executor, and field mapping engine
//! into per-document runs ([`pipeline`]) and budgeted batches ([`batch`]).

pub mod batch;
pub mod definition;
pub mod pipeline;

pub use batch::{
    AbortReason, BatchAbort, BatchController, BatchProgress, BatchResult, BatchStatus,
    SilentBatchProgress,
};
pub use definition::{IndexDefinition, PipelineDefinition, PipelineParameters};
pub use pipeline::{
    DocumentFailure, DocumentOutcome, DocumentWarning, FailureReason, Pipeline, PipelineResult,
    PipelineRunner, SourceDocument, WarningDetail, run_pipeline,
};
