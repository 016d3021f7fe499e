//! Error types for Enrichflow.
//!
//! Library crates use [`EnrichflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-document and per-field problems that a batch tolerates are not
//! returned as errors; they are recorded as data (`SkillWarning`,
//! `DocumentFailure`, `BatchAbort`) by the crates that produce them.

use std::path::PathBuf;

/// Top-level error type for all Enrichflow operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichflowError {
    /// Invalid skill graph, mapping table, schema, or config file.
    ///
    /// Always fatal and raised before any document is processed.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A path could not be parsed or did not fit the document shape.
    #[error("path error at '{path}': {message}")]
    Path { path: String, message: String },

    /// An external skill call failed or returned malformed output.
    #[error("skill '{skill}' failed at {instance}: {message}")]
    SkillInvocation {
        skill: String,
        instance: String,
        message: String,
    },

    /// Input document or definition file could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// The run was cancelled through its cancellation token.
    #[error("cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnrichflowError>;

impl EnrichflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a path error for `path`.
    pub fn path(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a skill invocation error for one skill/context instance.
    pub fn skill(
        skill: impl Into<String>,
        instance: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SkillInvocation {
            skill: skill.into(),
            instance: instance.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create an invalid-state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a configuration problem (fail-fast class).
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
