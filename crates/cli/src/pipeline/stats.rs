//! Run statistics.

use std::time::Duration;

use serde::Serialize;

use adapters::AdapterCounters;
use contracts::AdapterKind;
use observability::MetricsSummary;
use routing::EngineStats;

/// Final state of one adapter
#[derive(Debug, Clone, Serialize)]
pub struct AdapterSummary {
    pub name: String,
    pub kind: AdapterKind,
    pub enabled: bool,
    #[serde(flatten)]
    pub counters: AdapterCounters,
}

/// Statistics from a demo run
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub duration_secs: f64,

    /// Errors reported through the engine's error callback
    pub errors: u64,

    pub engine: EngineStats,

    pub adapters: Vec<AdapterSummary>,

    /// Calculation and dependency timing, printed only
    #[serde(skip)]
    pub metrics: MetricsSummary,
}

impl RunStats {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }

    /// Measurements emitted by all producers
    pub fn emitted(&self) -> u64 {
        self.adapters.iter().map(|a| a.counters.emitted).sum()
    }

    /// Measurements handed to consumers
    pub fn delivered(&self) -> u64 {
        self.engine.consumers.values().map(|m| m.delivered).sum()
    }

    /// Delivered measurements per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.delivered() as f64 / secs
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Routing Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration_secs);
        println!("   ├─ Snapshot version: {}", self.engine.version);
        println!(
            "   ├─ Routes: {} for {} destinations",
            self.engine.routes, self.engine.destinations
        );
        println!(
            "   ├─ Recalculations: {} ({} coalesced)",
            self.engine.recalculations, self.engine.coalesced_recalculations
        );
        println!("   ├─ Emitted: {}", self.emitted());
        println!("   ├─ Delivered: {} ({:.1}/s)", self.delivered(), self.throughput());
        println!("   └─ Errors: {}", self.errors);

        println!("\nAdapters ({})", self.adapters.len());
        for (i, adapter) in self.adapters.iter().enumerate() {
            let prefix = if i + 1 == self.adapters.len() { "└─" } else { "├─" };
            println!(
                "   {} {} ({:?}, {}) received={} emitted={} failed={}",
                prefix,
                adapter.name,
                adapter.kind,
                if adapter.enabled { "enabled" } else { "disabled" },
                adapter.counters.received,
                adapter.counters.emitted,
                adapter.counters.failed
            );
        }

        if !self.engine.consumers.is_empty() {
            println!("\nConsumer Queues");
            for (id, queue) in &self.engine.consumers {
                println!(
                    "   ├─ {}: enqueued={} delivered={} failed_batches={} depth={}",
                    id, queue.enqueued, queue.delivered, queue.failed_batches, queue.queue_depth
                );
            }
        }

        println!("\n{}", self.metrics);
    }
}
