//! LocalRouteCache - per-producer, lazily populated route lookups
//!
//! The fast path takes only a shared lock. A miss releases it, takes the
//! exclusive lock and re-checks the snapshot version before touching
//! anything, since another thread may have refreshed the cache in between.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tracing::trace;

use contracts::{AdapterId, MeasurementRef, SignalKey};
use dispatcher::ConsumerHandle;

use crate::snapshot::{Destination, RouteSnapshot};

/// Measurement waiting on other consumers before it reaches `handle`.
#[derive(Debug, Clone)]
pub struct GateEntry {
    pub handle: Arc<ConsumerHandle>,
    pub measurement: MeasurementRef,
    pub required: Arc<[AdapterId]>,
    pub timeout: Duration,
}

/// A producer batch resolved against one snapshot version.
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    /// Per-consumer batches, in first-seen consumer order; each keeps input order
    pub groups: Vec<(Arc<ConsumerHandle>, Vec<MeasurementRef>)>,
    /// Dependency-gated deliveries
    pub gated: Vec<GateEntry>,
    /// Keys resolved against the global snapshot
    pub cache_misses: usize,
    /// Whether this call discarded a stale cache
    pub invalidated: bool,
}

impl ResolvedBatch {
    /// Measurements headed for immediate enqueue
    pub fn immediate_count(&self) -> usize {
        self.groups.iter().map(|(_, batch)| batch.len()).sum()
    }

    fn assemble<'a>(
        &mut self,
        resolved: impl Iterator<Item = (&'a MeasurementRef, Arc<[Destination]>)>,
    ) {
        let mut index: HashMap<AdapterId, usize> = HashMap::new();
        for (measurement, destinations) in resolved {
            for destination in destinations.iter() {
                if let Some(gate) = &destination.gate {
                    self.gated.push(GateEntry {
                        handle: Arc::clone(&destination.handle),
                        measurement: Arc::clone(measurement),
                        required: Arc::clone(&gate.required),
                        timeout: gate.timeout,
                    });
                    continue;
                }
                let slot = *index.entry(destination.id().clone()).or_insert_with(|| {
                    self.groups.push((Arc::clone(&destination.handle), Vec::new()));
                    self.groups.len() - 1
                });
                self.groups[slot].1.push(Arc::clone(measurement));
            }
        }
    }
}

struct CacheState {
    version: Option<u64>,
    routes: HashMap<SignalKey, Arc<[Destination]>>,
}

/// Per-producer route cache tagged with the snapshot version it was built from.
pub struct LocalRouteCache {
    source: Arc<ArcSwap<RouteSnapshot>>,
    state: RwLock<CacheState>,
}

impl LocalRouteCache {
    pub fn new(source: Arc<ArcSwap<RouteSnapshot>>) -> Self {
        Self {
            source,
            state: RwLock::new(CacheState {
                version: None,
                routes: HashMap::new(),
            }),
        }
    }

    /// Snapshot version the cached entries belong to.
    pub fn version(&self) -> Option<u64> {
        self.state.read().version
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.state.read().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every measurement in `batch` to its consumers.
    pub fn resolve(&self, batch: &[MeasurementRef]) -> ResolvedBatch {
        let mut out = ResolvedBatch::default();
        if batch.is_empty() {
            return out;
        }

        if let Some(hits) = self.try_fast_path(batch) {
            out.assemble(batch.iter().zip(hits));
            return out;
        }

        let mut state = self.state.write();
        let snapshot = self.source.load_full();
        let current = snapshot.version();

        match state.version {
            Some(cached) if cached == current => {}
            Some(cached) if cached > current => {
                // Snapshots only move forward; keep the newer entries.
                debug_assert!(false, "snapshot version went backwards");
            }
            _ => {
                // Dropping stale entries releases this cache's references to
                // consumers that are gone, which lets their queues close.
                state.routes.clear();
                state.version = Some(current);
                out.invalidated = true;
                trace!(version = current, "Local route cache invalidated");
            }
        }

        let mut resolved = Vec::with_capacity(batch.len());
        for measurement in batch {
            let destinations = match state.routes.get(&measurement.key) {
                Some(d) => Arc::clone(d),
                None => {
                    out.cache_misses += 1;
                    let d = snapshot.destinations_for(&measurement.key);
                    state.routes.insert(measurement.key.clone(), Arc::clone(&d));
                    d
                }
            };
            resolved.push(destinations);
        }
        drop(state);

        out.assemble(batch.iter().zip(resolved));
        out
    }

    /// All keys cached at the current version, or `None` on any miss.
    fn try_fast_path(&self, batch: &[MeasurementRef]) -> Option<Vec<Arc<[Destination]>>> {
        let state = self.state.read();
        if state.version != Some(self.source.load().version()) {
            return None;
        }
        batch
            .iter()
            .map(|m| state.routes.get(&m.key).cloned())
            .collect()
    }
}
