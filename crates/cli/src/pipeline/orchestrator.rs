//! Demo run orchestrator - builds the synthetic topology and drives the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{info, instrument, warn};

use adapters::{build_topology, BuiltAdapter};
use contracts::{key_set, Adapter, MeasurementRef, RouterBlueprint};
use routing::{RoutingError, RoutingTables, TopologyPatch};

use super::{AdapterSummary, RunStats};
use crate::error::{CliError, Result};

/// Demo run configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub blueprint: RouterBlueprint,

    /// How long producers run before shutdown
    pub duration: Duration,

    /// Connect-on-demand restriction (empty = unrestricted)
    pub demand: Vec<String>,

    /// Progress report interval (None = disabled)
    pub report_every: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Demo run orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Build, run for the configured duration, shut down and collect statistics.
    #[instrument(name = "pipeline_run", skip(self), fields(adapters = self.config.blueprint.adapters.len()))]
    pub async fn run(self) -> Result<RunStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port).map_err(|e| CliError::task(e.to_string()))?;
            info!("Metrics endpoint available on port {}", port);
        }

        let errors = Arc::new(AtomicU64::new(0));
        let tables = RoutingTables::new(blueprint.engine.clone())?;
        let error_count = Arc::clone(&errors);
        tables.initialize(
            None,
            Some(Arc::new(move |_: &RoutingError| {
                error_count.fetch_add(1, Ordering::Relaxed);
            })),
        );

        info!("Building synthetic topology...");
        let built = build_topology(&blueprint.adapters, &Handle::current())?;
        install_completion_hooks(&built, &tables);

        let patch = built
            .iter()
            .fold(TopologyPatch::new(), |patch, adapter| patch.add(adapter.registration()));
        let version = tables.patch_routing_table(patch)?;
        info!(version, "Topology registered");

        if !self.config.demand.is_empty() {
            let restriction = key_set(self.config.demand.iter().map(String::as_str));
            info!(keys = restriction.len(), "Applying demand restriction");
            tables
                .calculate_routing_tables(Some(restriction))
                .await
                .map_err(|e| CliError::task(e.to_string()))?;
        }

        self.drive(&tables).await;

        info!("Shutting down routing engine...");
        for adapter in &built {
            if let BuiltAdapter::Producer(producer) = adapter {
                producer.set_enabled(false);
            }
        }
        tables.shutdown().await;

        let stats = RunStats {
            duration_secs: start_time.elapsed().as_secs_f64(),
            errors: errors.load(Ordering::Relaxed),
            engine: tables.stats(),
            adapters: built.iter().map(summarize).collect(),
            metrics: tables.metrics_summary(),
        };

        info!(
            duration_secs = stats.duration_secs,
            delivered = stats.delivered(),
            throughput = format!("{:.1}", stats.throughput()),
            "Run complete"
        );
        Ok(stats)
    }

    /// Let the topology run, logging progress.
    async fn drive(&self, tables: &Arc<RoutingTables>) {
        let deadline = tokio::time::Instant::now() + self.config.duration;
        info!(duration_secs = self.config.duration.as_secs(), "Topology running");

        let Some(every) = self.config.report_every else {
            tokio::time::sleep_until(deadline).await;
            return;
        };

        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = interval.tick() => {
                    let stats = tables.stats();
                    let delivered: u64 = stats.consumers.values().map(|m| m.delivered).sum();
                    let depth: usize = stats.consumers.values().map(|m| m.queue_depth).sum();
                    if stats.pending_dependencies > 0 {
                        warn!(pending = stats.pending_dependencies, "Measurements waiting on dependencies");
                    }
                    info!(
                        version = stats.version,
                        delivered,
                        queue_depth = depth,
                        intake_queued = stats.intake_queued,
                        "Progress"
                    );
                }
            }
        }
    }
}

/// Report consumed measurements to the engine so dependents can be released.
fn install_completion_hooks(built: &[BuiltAdapter], tables: &Arc<RoutingTables>) {
    for adapter in built {
        let tables: Weak<RoutingTables> = Arc::downgrade(tables);
        let id = adapter.state().id().clone();
        adapter.set_on_ingest(Arc::new(move |batch: &[MeasurementRef]| {
            if let Some(tables) = tables.upgrade() {
                for measurement in batch {
                    tables.notify_processed(&id, measurement);
                }
            }
        }));
    }
}

fn summarize(adapter: &BuiltAdapter) -> AdapterSummary {
    let state = adapter.state();
    AdapterSummary {
        name: state.id().to_string(),
        kind: adapter.kind(),
        enabled: state.is_enabled(),
        counters: state.counters(),
    }
}
