//! Application configuration for Enrichflow.
//!
//! User config lives at `~/.enrichflow/enrichflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EnrichflowError, Result};
use crate::types::FailureLimit;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "enrichflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".enrichflow";

// ---------------------------------------------------------------------------
// Config structs (matching enrichflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Skill bridge subprocess settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum in-flight skill invocations (and documents) per batch.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: u32,

    /// Failed documents tolerated before the batch aborts.
    #[serde(default = "default_failure_limit")]
    pub max_failed_documents: FailureLimit,

    /// Failed field extractions tolerated before a document fails.
    #[serde(default = "default_failure_limit")]
    pub max_failed_fields_per_document: FailureLimit,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            max_failed_documents: default_failure_limit(),
            max_failed_fields_per_document: default_failure_limit(),
        }
    }
}

fn default_concurrency_limit() -> u32 {
    4
}
fn default_failure_limit() -> FailureLimit {
    FailureLimit::Limited(0)
}

/// `[bridge]` section: the subprocess that implements external skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Command to spawn (e.g. "python3").
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the subprocess (defaults to the current dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: vec!["skills_bridge.py".into()],
            working_dir: None,
        }
    }
}

fn default_bridge_command() -> String {
    "python3".into()
}

// ---------------------------------------------------------------------------
// Pipeline options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline options, merged from the config file and CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Failed documents tolerated before the batch aborts.
    pub max_failed_documents: FailureLimit,
    /// Failed field extractions tolerated before a document fails.
    pub max_failed_fields_per_document: FailureLimit,
    /// Maximum concurrent skill invocations; also caps concurrent documents.
    pub concurrency_limit: usize,
}

impl PipelineOptions {
    /// Number of documents to run at once: available parallelism, capped by
    /// the concurrency limit.
    pub fn document_workers(&self) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        parallelism.min(self.concurrency_limit).max(1)
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_failed_documents: config.defaults.max_failed_documents,
            max_failed_fields_per_document: config.defaults.max_failed_fields_per_document,
            concurrency_limit: (config.defaults.concurrency_limit as usize).max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.enrichflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EnrichflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.enrichflow/enrichflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnrichflowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        EnrichflowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnrichflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnrichflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnrichflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("concurrency_limit"));
        assert!(toml_str.contains("max_failed_documents"));
        assert!(toml_str.contains("python3"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency_limit, 4);
        assert_eq!(parsed.defaults.max_failed_documents, FailureLimit::Limited(0));
        assert_eq!(parsed.bridge.command, "python3");
    }

    #[test]
    fn config_accepts_unlimited_budgets() {
        let toml_str = r#"
[defaults]
concurrency_limit = 8
max_failed_documents = -1
max_failed_fields_per_document = "unlimited"

[bridge]
command = "node"
args = ["bridge.js"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_failed_documents, FailureLimit::Unlimited);
        assert_eq!(
            config.defaults.max_failed_fields_per_document,
            FailureLimit::Unlimited
        );
        assert_eq!(config.bridge.args, vec!["bridge.js".to_string()]);
    }

    #[test]
    fn pipeline_options_from_app_config() {
        let mut app = AppConfig::default();
        app.defaults.concurrency_limit = 0;
        let options = PipelineOptions::from(&app);
        assert_eq!(options.concurrency_limit, 1);
        assert_eq!(options.document_workers(), 1);
        assert_eq!(options.max_failed_documents, FailureLimit::Limited(0));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[defaults]\nmax_failed_documents = 2\n").expect("write");

        let config = load_config_from(&path).expect("load");
        assert_eq!(config.defaults.max_failed_documents, FailureLimit::Limited(2));
        assert_eq!(config.defaults.concurrency_limit, 4);
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[defaults\n").expect("write");

        let err = load_config_from(&path).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("failed to parse"));
    }
}
