//! Skills, the skill graph, and the stage-wise skill graph executor.
//!
//! - [`SkillDefinition`]: the declarative form of one skill
//! - [`SkillGraph`]: validated skills plus dependency edges and stages
//! - [`SkillGraphExecutor`]: runs a graph over one document
//! - [`SkillInvoker`]: the port external skill implementations plug into

pub mod definition;
pub mod executor;
pub mod graph;
pub mod invoker;
pub mod merge;

pub use definition::{InputMapping, OutputMapping, SkillDefinition, SkillKind};
pub use executor::{EnrichmentReport, FieldBudget, SkillGraphExecutor, SkillWarning};
pub use graph::{CompiledSkill, SkillGraph};
pub use invoker::{FnSkillInvoker, SkillInputs, SkillInvocation, SkillInvoker, SkillOutputs};
