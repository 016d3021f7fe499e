//! Hierarchical document model for the enrichment pipeline.
//!
//! A [`Document`] is a tree of named fields holding [`Value`]s. Fields are
//! addressed with [`FieldPath`]s such as `/document/normalized_images/*/text`,
//! where `*` stands for every element of the preceding sequence.
//!
//! Reading a path that matches nothing yields an empty result rather than an
//! error, so skills and mappings can treat every field as optional.

pub mod document;
pub mod path;
pub mod value;

pub use document::Document;
pub use path::{FieldPath, ROOT_SEGMENT, Segment};
pub use value::Value;
