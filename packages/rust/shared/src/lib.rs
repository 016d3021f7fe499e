//! Shared types, error model, and configuration for Enrichflow.
//!
//! This crate is the foundation depended on by all other Enrichflow crates.
//! It provides:
//! - [`EnrichflowError`], the unified error type
//! - Domain types ([`RunId`], [`FailureLimit`])
//! - Configuration ([`AppConfig`], [`PipelineOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, DefaultsConfig, PipelineOptions, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{EnrichflowError, Result};
pub use types::{FailureLimit, RunId};
