//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    for warning in config_loader::ConfigLoader::warnings(&blueprint) {
        warn!("{warning}");
    }

    info!(
        strategy = ?blueprint.engine.strategy,
        adapters = blueprint.adapters.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        duration: Duration::from_secs(args.duration),
        demand: args.demand.clone(),
        report_every: (args.report_every > 0).then(|| Duration::from_secs(args.report_every)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    let shutdown_signal = setup_shutdown_signal();

    info!("Starting routing engine...");

    tokio::select! {
        result = pipeline.run() => {
            let stats = result.context("Routing run failed")?;
            if args.json {
                let json = serde_json::to_string_pretty(&stats)
                    .context("Failed to serialize run statistics")?;
                println!("{json}");
            } else {
                stats.print_summary();
            }
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, stopping run...");
        }
    }

    info!("Measurement router finished");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::RouterBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Engine:");
    println!("  Strategy: {:?}", blueprint.engine.strategy);
    println!(
        "  Drain: batch_size={} tick={}ms",
        blueprint.engine.drain.batch_size, blueprint.engine.drain.tick_ms
    );
    println!("\nAdapters ({}):", blueprint.adapters.len());
    for adapter in &blueprint.adapters {
        let inputs = adapter
            .inputs
            .as_ref()
            .map_or_else(|| "*".to_string(), |keys| keys.len().to_string());
        println!(
            "  - {} ({:?}) inputs={} outputs={}",
            adapter.name,
            adapter.kind,
            inputs,
            adapter.outputs.len()
        );
    }
    println!();
}
