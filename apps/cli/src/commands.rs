//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use enrichflow_core::{
    BatchController, BatchProgress, BatchResult, BatchStatus, DocumentOutcome, Pipeline,
    PipelineDefinition, PipelineResult,
};
use enrichflow_shared::{AppConfig, FailureLimit, PipelineOptions, init_config, load_config};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::bridge::BridgeInvoker;
use crate::io;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Enrichflow: enrich documents through a graph of skills.
#[derive(Parser)]
#[command(
    name = "enrichflow",
    version,
    about = "Run documents through a skill graph and project them into index records.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a batch of documents through a pipeline.
    Run {
        /// Pipeline definition file (.toml or .json).
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Input documents, one JSON object per line.
        #[arg(short, long)]
        input: PathBuf,

        /// Output records file (defaults to stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write failed documents to this file as JSON lines.
        #[arg(long)]
        failures: Option<PathBuf>,

        /// Maximum concurrent skill invocations.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Failed documents tolerated before the batch aborts (-1 = unlimited).
        #[arg(long, allow_hyphen_values = true)]
        max_failed_documents: Option<FailureLimit>,

        /// Failed fields tolerated per document (-1 = unlimited).
        #[arg(long, allow_hyphen_values = true)]
        max_failed_fields: Option<FailureLimit>,
    },

    /// Check a pipeline definition and print its execution plan.
    Validate {
        /// Pipeline definition file (.toml or .json).
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Batch limits given on the command line; they win over everything else.
#[derive(Debug, Default, Clone, Copy)]
struct Overrides {
    concurrency: Option<usize>,
    max_failed_documents: Option<FailureLimit>,
    max_failed_fields: Option<FailureLimit>,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "enrichflow=info",
        1 => "enrichflow=debug",
        _ => "enrichflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr; stdout carries records.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            pipeline,
            input,
            output,
            failures,
            concurrency,
            max_failed_documents,
            max_failed_fields,
        } => {
            let overrides = Overrides {
                concurrency,
                max_failed_documents,
                max_failed_fields,
            };
            cmd_run(&pipeline, &input, output.as_deref(), failures.as_deref(), overrides).await
        }
        Command::Validate { pipeline } => cmd_validate(&pipeline).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Flags > pipeline parameters > config file > built-in defaults.
fn resolve_options(
    config: &AppConfig,
    definition: &PipelineDefinition,
    overrides: Overrides,
) -> PipelineOptions {
    let mut options = definition.parameters.apply(PipelineOptions::from(config));
    if let Some(n) = overrides.concurrency {
        options.concurrency_limit = n.max(1);
    }
    if let Some(limit) = overrides.max_failed_documents {
        options.max_failed_documents = limit;
    }
    if let Some(limit) = overrides.max_failed_fields {
        options.max_failed_fields_per_document = limit;
    }
    options
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    pipeline_path: &Path,
    input: &Path,
    output: Option<&Path>,
    failures: Option<&Path>,
    overrides: Overrides,
) -> Result<()> {
    let config = load_config()?;
    let definition = PipelineDefinition::load(pipeline_path)?;
    let pipeline = Arc::new(Pipeline::from_definition(&definition)?);
    let options = resolve_options(&config, &definition, overrides);
    let documents = io::read_documents(input)?;

    info!(
        pipeline = %pipeline_path.display(),
        documents = documents.len(),
        concurrency = options.concurrency_limit,
        max_failed_documents = %options.max_failed_documents,
        max_failed_fields = %options.max_failed_fields_per_document,
        "running pipeline"
    );

    let bridge = Arc::new(BridgeInvoker::spawn(&config.bridge).await?);
    let progress = Arc::new(CliProgress::new());
    let controller = Arc::new(
        BatchController::new(pipeline, bridge.clone(), options).with_progress(progress.clone()),
    );

    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, cancelling batch");
                controller.cancel();
            }
        })
    };

    let result = controller.run_batch(documents).await;
    interrupt.abort();
    progress.finish();
    bridge.shutdown().await?;
    let result = result?;

    io::write_lines(output, &result.records)?;
    if let Some(path) = failures {
        io::write_lines(Some(path), &result.failures)?;
    }
    print_summary(&result, output);

    match result.abort {
        Some(abort) => Err(eyre!("batch aborted: {}", abort.reason)),
        None => Ok(()),
    }
}

fn print_summary(result: &BatchResult, output: Option<&Path>) {
    eprintln!();
    eprintln!("  Batch {}", result.status);
    eprintln!("  Run:        {}", result.run_id);
    eprintln!("  Graph:      {}", &result.graph_digest[..result.graph_digest.len().min(12)]);
    eprintln!("  Succeeded:  {}", result.succeeded);
    eprintln!("  Partial:    {}", result.partially_failed);
    eprintln!("  Failed:     {}", result.failed);
    if result.unprocessed > 0 {
        eprintln!("  Skipped:    {}", result.unprocessed);
    }
    if let Some(path) = output {
        eprintln!("  Records:    {}", path.display());
    }
    eprintln!("  Time:       {:.1}s", result.elapsed.as_secs_f64());

    for failure in &result.failures {
        eprintln!("  ✗ [{}] {}: {}", failure.position, failure.document_id, failure.reason);
    }
    for warning in &result.warnings {
        eprintln!("  ! {warning}");
    }
    eprintln!();
}

async fn cmd_validate(path: &Path) -> Result<()> {
    let definition = PipelineDefinition::load(path)?;
    let pipeline = Pipeline::from_definition(&definition)?;
    let graph = pipeline.graph();
    let schema = pipeline.schema();

    println!();
    println!("  Pipeline:  {}", pipeline.name().unwrap_or("(unnamed)"));
    println!("  Digest:    {}", pipeline.digest());
    println!("  Skills:    {}", graph.len());
    println!(
        "  Index:     {} fields, key '{}'",
        schema.fields().len(),
        schema.key_field().name
    );
    println!();
    for (n, stage) in graph.stage_names().iter().enumerate() {
        println!("  Stage {n}:   {}", stage.join(", "));
    }
    println!();
    println!("  Order:     {}", graph.execution_order().join(" -> "));
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn status_changed(&self, status: BatchStatus) {
        self.spinner.set_message(format!("Batch {status}"));
    }

    fn document_finished(&self, result: &PipelineResult, processed: usize, total: usize) {
        let mark = match &result.outcome {
            DocumentOutcome::Succeeded(_) => "ok",
            DocumentOutcome::PartiallyFailed { .. } => "partial",
            DocumentOutcome::Failed(_) => "failed",
        };
        self.spinner.set_message(format!(
            "Enriching [{processed}/{total}] {} ({mark})",
            result.document_id
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const DEMO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/pipelines/margies.toml");

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_unlimited_budgets() {
        let cli = Cli::try_parse_from([
            "enrichflow",
            "run",
            "--pipeline",
            "p.toml",
            "--input",
            "docs.jsonl",
            "--max-failed-documents",
            "-1",
            "--max-failed-fields",
            "unlimited",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                max_failed_documents,
                max_failed_fields,
                output,
                ..
            } => {
                assert_eq!(max_failed_documents, Some(FailureLimit::Unlimited));
                assert_eq!(max_failed_fields, Some(FailureLimit::Unlimited));
                assert_eq!(output, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn flags_override_pipeline_parameters() {
        let definition = PipelineDefinition::load(Path::new(DEMO)).unwrap();
        let config = AppConfig::default();

        // The demo pipeline carries its own budgets.
        let options = resolve_options(&config, &definition, Overrides::default());
        assert_eq!(options.max_failed_documents, FailureLimit::Unlimited);
        assert_eq!(options.max_failed_fields_per_document, FailureLimit::Limited(3));
        assert_eq!(options.concurrency_limit, 4);

        let overrides = Overrides {
            concurrency: Some(0),
            max_failed_documents: Some(FailureLimit::Limited(1)),
            max_failed_fields: None,
        };
        let options = resolve_options(&config, &definition, overrides);
        assert_eq!(options.max_failed_documents, FailureLimit::Limited(1));
        assert_eq!(options.max_failed_fields_per_document, FailureLimit::Limited(3));
        assert_eq!(options.concurrency_limit, 1);
    }

    #[tokio::test]
    async fn validate_accepts_demo_pipeline() {
        cmd_validate(Path::new(DEMO)).await.unwrap();
    }
}
