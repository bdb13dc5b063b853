//! Routing engine configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Routing engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How produced measurements reach the route resolver
    #[serde(default)]
    pub strategy: RoutingStrategy,

    /// Consumer queue drain configuration
    #[serde(default)]
    pub drain: DrainConfig,

    /// Dependency notification scheduler configuration
    #[serde(default)]
    pub dependency: DependencyConfig,
}

/// Routing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Resolve and fan out on the producer's calling thread
    #[default]
    LowLatency,
    /// Buffer into one intake queue, resolved by a timer-driven worker
    HighLatency {
        #[serde(default = "default_tick_ms")]
        tick_ms: u64,
    },
}

fn default_tick_ms() -> u64 {
    100
}

/// Per-consumer drain worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Maximum measurements handed to one `ingest` call
    pub batch_size: usize,
    /// Worker wake-up interval when no enqueue notification arrives
    pub tick_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            tick_ms: 10,
        }
    }
}

impl DrainConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Dependency scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Run a timeout sweep every N scheduler events
    pub sweep_every: usize,
    /// Sweep at least this often while entries are pending
    pub sweep_interval_ms: u64,
    /// Timeout for adapters that declare dependencies but no timeout.
    /// Unset means such adapters are never gated.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            sweep_every: 100,
            sweep_interval_ms: 250,
            default_timeout_ms: None,
        }
    }
}

impl DependencyConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}
