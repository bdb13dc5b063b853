//! Consumer metrics for observability

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single consumer
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Items waiting in the queue
    queue_depth: AtomicUsize,
    /// Total items accepted by the queue
    enqueued: AtomicU64,
    /// Total items ingested successfully
    delivered: AtomicU64,
    /// Total batches rejected by the consumer
    failed_batches: AtomicU64,
    /// Total items lost with rejected batches
    dropped: AtomicU64,
    /// Total drain activations that found work
    drains: AtomicU64,
}

impl ConsumerMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn add_enqueued(&self, n: usize) {
        self.enqueued.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn add_delivered(&self, n: usize) {
        self.delivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    /// Record a rejected batch of `n` items
    pub fn record_failed_batch(&self, n: usize) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn drains(&self) -> u64 {
        self.drains.load(Ordering::Relaxed)
    }

    pub fn inc_drains(&self) {
        self.drains.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth: self.queue_depth(),
            enqueued: self.enqueued(),
            delivered: self.delivered(),
            failed_batches: self.failed_batches(),
            dropped: self.dropped(),
            drains: self.drains(),
        }
    }
}

/// Snapshot of consumer metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_depth: usize,
    pub enqueued: u64,
    pub delivered: u64,
    pub failed_batches: u64,
    pub dropped: u64,
    pub drains: u64,
}
