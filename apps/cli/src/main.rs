//! Enrichflow CLI: run document enrichment pipelines from the command line.
//!
//! Documents are read as JSON Lines, enriched through an external skill
//! bridge process, and written back out as flattened index records.

mod bridge;
mod commands;
mod io;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
