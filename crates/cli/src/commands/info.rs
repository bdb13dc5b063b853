//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{AdapterConfig, AdapterKind, RouterBlueprint};

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    engine: EngineInfo,
    adapters: Vec<AdapterInfo>,
}

#[derive(Serialize)]
struct EngineInfo {
    strategy: String,
    drain_batch_size: usize,
    drain_tick_ms: u64,
    sweep_every: usize,
    sweep_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct AdapterInfo {
    name: String,
    kind: AdapterKind,
    auto_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    inputs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<String>,
    respect_input_demand: bool,
    respect_output_demand: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn adapter_info(adapter: &AdapterConfig, detailed: bool) -> AdapterInfo {
    AdapterInfo {
        name: adapter.name.clone(),
        kind: adapter.kind,
        auto_start: adapter.auto_start,
        inputs: if detailed { adapter.inputs.clone() } else { None },
        outputs: if detailed { adapter.outputs.clone() } else { Vec::new() },
        dependencies: adapter.dependency_names(),
        respect_input_demand: adapter.respect_input_demand,
        respect_output_demand: adapter.respect_output_demand,
    }
}

fn build_config_info(blueprint: &RouterBlueprint, args: &InfoArgs) -> ConfigInfo {
    let engine = &blueprint.engine;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        engine: EngineInfo {
            strategy: format!("{:?}", engine.strategy),
            drain_batch_size: engine.drain.batch_size,
            drain_tick_ms: engine.drain.tick_ms,
            sweep_every: engine.dependency.sweep_every,
            sweep_interval_ms: engine.dependency.sweep_interval_ms,
            default_timeout_ms: engine.dependency.default_timeout_ms,
        },
        adapters: blueprint
            .adapters
            .iter()
            .map(|a| adapter_info(a, args.adapters))
            .collect(),
    }
}

fn print_config_info(blueprint: &RouterBlueprint, args: &InfoArgs) {
    println!("=== Measurement Router Configuration ===\n");

    let engine = &blueprint.engine;
    println!("Engine");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Strategy: {:?}", engine.strategy);
    println!(
        "   ├─ Drain: batch_size={}, tick={}ms",
        engine.drain.batch_size, engine.drain.tick_ms
    );
    println!(
        "   ├─ Dependency sweep: every {} events or {}ms",
        engine.dependency.sweep_every, engine.dependency.sweep_interval_ms
    );
    match engine.dependency.default_timeout_ms {
        Some(ms) => println!("   └─ Default dependency timeout: {ms}ms"),
        None => println!("   └─ Default dependency timeout: (none)"),
    }

    println!("\nAdapters ({})", blueprint.adapters.len());
    for (i, adapter) in blueprint.adapters.iter().enumerate() {
        let is_last = i + 1 == blueprint.adapters.len();
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        let start = if adapter.auto_start { "auto" } else { "on demand" };
        println!("   {} {} ({:?}, {})", prefix, adapter.name, adapter.kind, start);

        if args.adapters {
            let inputs = adapter
                .inputs
                .as_ref()
                .map_or_else(|| "(all)".to_string(), |keys| keys.join(", "));
            println!("   {}  ├─ Inputs: {}", child_prefix, inputs);
            println!("   {}  ├─ Outputs: {}", child_prefix, adapter.outputs.join(", "));
            println!(
                "   {}  ├─ Respect demand: input={} output={}",
                child_prefix, adapter.respect_input_demand, adapter.respect_output_demand
            );
        }
        let dependencies = adapter.dependency_names();
        if dependencies.is_empty() {
            println!("   {}  └─ Dependencies: (none)", child_prefix);
        } else {
            println!("   {}  └─ Dependencies: {}", child_prefix, dependencies.join(", "));
        }
    }

    println!();
}
