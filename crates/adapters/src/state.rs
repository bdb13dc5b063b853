//! Adapter state shared by every reference adapter

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use contracts::{parse_dependency_names, AdapterConfig, AdapterId, KeySet};

/// Static adapter settings.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub auto_start: bool,
    pub respect_input_demand: bool,
    pub respect_output_demand: bool,
    pub dependencies: Vec<String>,
    pub dependency_timeout: Option<Duration>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            auto_start: true,
            respect_input_demand: false,
            respect_output_demand: false,
            dependencies: Vec::new(),
            dependency_timeout: None,
        }
    }
}

impl AdapterSettings {
    /// Started and stopped by connect-on-demand instead of on its own.
    pub fn manual(mut self) -> Self {
        self.auto_start = false;
        self
    }

    pub fn respect_input(mut self) -> Self {
        self.respect_input_demand = true;
        self
    }

    pub fn respect_output(mut self) -> Self {
        self.respect_output_demand = true;
        self
    }

    /// Parse a `dependencies` setting such as `"calc; alarm"`.
    pub fn depends_on(mut self, setting: &str) -> Self {
        self.dependencies = parse_dependency_names(setting);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = Some(timeout);
        self
    }
}

impl From<&AdapterConfig> for AdapterSettings {
    fn from(config: &AdapterConfig) -> Self {
        Self {
            auto_start: config.auto_start,
            respect_input_demand: config.respect_input_demand,
            respect_output_demand: config.respect_output_demand,
            dependencies: config.dependency_names(),
            dependency_timeout: config.dependency_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Adapter activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdapterCounters {
    pub received: u64,
    pub emitted: u64,
    pub failed: u64,
}

/// Mutable adapter state behind the `Adapter` contract.
#[derive(Debug)]
pub struct AdapterState {
    id: AdapterId,
    settings: AdapterSettings,
    enabled: AtomicBool,
    requested_input: Mutex<Option<KeySet>>,
    requested_output: Mutex<Option<KeySet>>,
    received: AtomicU64,
    emitted: AtomicU64,
    failed: AtomicU64,
}

impl AdapterState {
    /// Auto-start adapters begin enabled.
    pub fn new(id: impl Into<AdapterId>, settings: AdapterSettings) -> Self {
        Self {
            id: id.into(),
            enabled: AtomicBool::new(settings.auto_start),
            settings,
            requested_input: Mutex::new(None),
            requested_output: Mutex::new(None),
            received: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &AdapterId {
        &self.id
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Store `enabled`, returning the previous value.
    pub fn swap_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    pub fn requested_input(&self) -> Option<KeySet> {
        self.requested_input.lock().clone()
    }

    pub fn set_requested_input(&self, keys: Option<KeySet>) {
        *self.requested_input.lock() = keys;
    }

    pub fn requested_output(&self) -> Option<KeySet> {
        self.requested_output.lock().clone()
    }

    pub fn set_requested_output(&self, keys: Option<KeySet>) {
        *self.requested_output.lock() = keys;
    }

    pub fn add_received(&self, n: usize) {
        self.received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_emitted(&self, n: usize) {
        self.emitted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> AdapterCounters {
        AdapterCounters {
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
