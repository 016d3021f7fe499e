//! Field mapping engine: projects documents into typed index records.
//!
//! - [`IndexSchema`]: the typed shape of an output record
//! - [`MappingTable`]: a validated, ordered list of field mappings
//! - [`MappingFunction`]: the closed set of value transforms
//! - [`OutputRecord`]: the flattened result

pub mod functions;
pub mod mapping;
pub mod record;
pub mod schema;

pub use functions::{MappingFunction, MappingFunctionSpec};
pub use mapping::{FieldMapping, FieldWarning, MappingTable, ensure_key_mapped};
pub use record::OutputRecord;
pub use schema::{FieldDefinition, FieldKind, IndexSchema};
