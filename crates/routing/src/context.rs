//! State shared by every route handler
//!
//! Producer handlers keep a `Weak` reference to this, never to
//! [`RoutingTables`](crate::RoutingTables), so a dual-role adapter holding a
//! handler cannot keep the engine alive through its own consumer handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use contracts::MeasurementRef;

use crate::dependency::DependencyScheduler;
use crate::events::EngineEvents;
use crate::local_cache::LocalRouteCache;
use crate::snapshot::RouteSnapshot;

pub(crate) struct RouteContext {
    pub snapshot: Arc<ArcSwap<RouteSnapshot>>,
    pub scheduler: DependencyScheduler,
    pub events: ArcSwap<EngineEvents>,
    shut_down: AtomicBool,
}

impl RouteContext {
    pub fn new(snapshot: Arc<ArcSwap<RouteSnapshot>>, scheduler: DependencyScheduler) -> Self {
        Self {
            snapshot,
            scheduler,
            events: ArcSwap::from_pointee(EngineEvents::default()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> Arc<EngineEvents> {
        self.events.load_full()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Flip to shut down; true only for the first caller.
    pub fn begin_shutdown(&self) -> bool {
        !self.shut_down.swap(true, Ordering::AcqRel)
    }

    /// Resolve `batch` through `cache` and hand it to the consumer queues.
    ///
    /// Returns the number of (measurement, consumer) deliveries, gated ones
    /// included.
    pub fn dispatch(&self, cache: &LocalRouteCache, batch: &[MeasurementRef]) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let resolved = cache.resolve(batch);
        if resolved.cache_misses > 0 {
            observability::record_route_cache_misses(resolved.cache_misses);
        }

        // Gates go first so a dependency's completion can never reach the
        // scheduler ahead of the entry it releases.
        let mut delivered = resolved.gated.len();
        self.scheduler.gate(resolved.gated);

        for (handle, measurements) in resolved.groups {
            let n = measurements.len();
            match handle.enqueue_batch(measurements) {
                Ok(()) => delivered += n,
                Err(e) => trace!(consumer = %handle.id(), error = %e, "Consumer queue closed, batch skipped"),
            }
        }

        observability::record_measurements_routed(delivered);
        delivered
    }
}
