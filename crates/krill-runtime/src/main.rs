//! # Krill
//!
//! ## Startup Sequence
//!
//! 1. Print the banner
//! 2. Load and check the configuration document
//! 3. Initialize logging (environment overrides the document)
//! 4. Build the graph, serve `/metrics`, run until Ctrl-C or `--duration`
//! 5. Log the summary

use anyhow::{Context, Result};
use clap::Parser;
use krill_runtime::app::{self, RunOptions};
use krill_runtime::cli::Cli;
use krill_runtime::{banner, loader};
use krill_telemetry::{init_logging, log_event, TelemetryConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    print!("{}", banner());

    let source = cli.source();
    let document = loader::load(&source, cli.format())
        .with_context(|| format!("Failed to load configuration from {source}"))?;

    let telemetry = TelemetryConfig::resolve(&document.log_level, document.ports.metrics);
    init_logging(&telemetry)?;
    log_event!(
        info,
        "krill",
        "Configuration loaded",
        source = %source,
        entities = document.simulation.entity_count()
    );

    let options = RunOptions {
        metrics_port: telemetry.metrics_port,
        duration: cli.duration,
    };
    let summary = app::run(&document, &options, CancellationToken::new()).await?;
    app::report(&summary);
    Ok(())
}
