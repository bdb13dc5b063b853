//! RoutingTables - the measurement routing engine
//!
//! Owns the adapter registry and the active [`RouteSnapshot`]. Topology
//! changes rebuild a whole new snapshot and publish it with one pointer swap.
//! Producers resolve against their own [`LocalRouteCache`] and never take the
//! registry lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{
    AdapterDescriptor, AdapterId, AdapterRegistration, ContractError, EngineConfig, KeySet,
    MeasurementHandler, MeasurementRef, RoutingStrategy,
};
use dispatcher::{ConsumerHandle, DispatcherError, FailureCallback, MetricsSnapshot};
use observability::{MetricsSummary, RoutingMetricsAggregator};

use crate::context::RouteContext;
use crate::demand::{DemandController, DemandPlan};
use crate::dependency::DependencyScheduler;
use crate::events::{EngineEvents, ErrorCallback, StatusCallback};
use crate::graph::DependencyGraph;
use crate::local_cache::LocalRouteCache;
use crate::single_flight::SingleFlight;
use crate::snapshot::{ConsumerEntry, RouteSnapshot};
use crate::strategy::Intake;
use crate::RoutingError;

/// Adapters added to or removed from the topology in one step.
#[derive(Debug, Clone, Default)]
pub struct TopologyPatch {
    pub added_producers: Vec<AdapterRegistration>,
    pub removed_producers: Vec<AdapterId>,
    pub added_consumers: Vec<AdapterRegistration>,
    pub removed_consumers: Vec<AdapterId>,
}

impl TopologyPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter under every role it has.
    pub fn add(mut self, registration: AdapterRegistration) -> Self {
        if registration.is_producer() {
            self.added_producers.push(registration.clone());
        }
        if registration.is_consumer() {
            self.added_consumers.push(registration);
        }
        self
    }

    /// Remove an adapter from every role.
    pub fn remove(mut self, id: impl Into<AdapterId>) -> Self {
        let id = id.into();
        self.removed_producers.push(id.clone());
        self.removed_consumers.push(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added_producers.is_empty()
            && self.removed_producers.is_empty()
            && self.added_consumers.is_empty()
            && self.removed_consumers.is_empty()
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub version: u64,
    pub routes: usize,
    pub destinations: usize,
    pub producers: usize,
    pub pending_dependencies: usize,
    pub intake_queued: usize,
    pub recalculations: u64,
    pub coalesced_recalculations: u64,
    pub consumers: BTreeMap<AdapterId, MetricsSnapshot>,
}

struct ConsumerSlot {
    registration: AdapterRegistration,
    handle: Arc<ConsumerHandle>,
}

#[derive(Default)]
struct Registry {
    producers: BTreeMap<AdapterId, AdapterRegistration>,
    consumers: BTreeMap<AdapterId, ConsumerSlot>,
    /// Producers with a handler installed
    attached: BTreeSet<AdapterId>,
}

pub struct RoutingTables {
    config: EngineConfig,
    runtime: Handle,
    context: Arc<RouteContext>,
    registry: Mutex<Registry>,
    caches: RwLock<HashMap<AdapterId, Arc<LocalRouteCache>>>,
    inject_cache: LocalRouteCache,
    intake: Option<Intake>,
    recalc: SingleFlight,
    restriction: Mutex<Option<KeySet>>,
    stats: Arc<Mutex<RoutingMetricsAggregator>>,
}

impl RoutingTables {
    /// Create the engine on the current tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, RoutingError> {
        let runtime = Handle::try_current().map_err(|e| RoutingError::Runtime(e.to_string()))?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create the engine with its workers on `runtime`.
    pub fn with_runtime(config: EngineConfig, runtime: Handle) -> Arc<Self> {
        let stats = Arc::new(Mutex::new(RoutingMetricsAggregator::new()));
        let snapshot = Arc::new(ArcSwap::from_pointee(RouteSnapshot::empty()));
        let scheduler = DependencyScheduler::spawn(&config.dependency, Arc::clone(&stats), &runtime);
        let context = Arc::new(RouteContext::new(Arc::clone(&snapshot), scheduler));

        let intake = match config.strategy {
            RoutingStrategy::LowLatency => None,
            RoutingStrategy::HighLatency { tick_ms } => Some(Intake::spawn(
                Arc::downgrade(&context),
                Duration::from_millis(tick_ms.max(1)),
                &runtime,
            )),
        };

        info!(strategy = ?config.strategy, "Routing tables created");
        Arc::new(Self {
            inject_cache: LocalRouteCache::new(snapshot),
            config,
            runtime,
            context,
            registry: Mutex::new(Registry::default()),
            caches: RwLock::new(HashMap::new()),
            intake,
            recalc: SingleFlight::new(),
            restriction: Mutex::new(None),
            stats,
        })
    }

    /// Register the host's status and error callbacks.
    pub fn initialize(&self, on_status: Option<StatusCallback>, on_error: Option<ErrorCallback>) {
        self.context
            .events
            .store(Arc::new(EngineEvents::new(on_status, on_error)));
        self.context.events().status("Routing tables initialized");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active snapshot.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.context.snapshot.load_full()
    }

    /// Apply a topology delta and publish the next snapshot version.
    ///
    /// Connect-on-demand is re-evaluated afterwards with the last restriction
    /// passed to [`calculate_routing_tables`](Self::calculate_routing_tables).
    #[instrument(
        name = "routing_patch",
        skip(self, patch),
        fields(
            added = patch.added_producers.len() + patch.added_consumers.len(),
            removed = patch.removed_producers.len() + patch.removed_consumers.len()
        )
    )]
    pub fn patch_routing_table(&self, patch: TopologyPatch) -> Result<u64, RoutingError> {
        self.ensure_running()?;

        let version = {
            let mut registry = self.registry.lock();
            self.apply_patch(&mut registry, patch);
            self.rebuild(&mut registry)
        };
        let version = version.inspect_err(|e| self.context.events().error(e))?;

        let restriction = self.restriction.lock().clone();
        if let Err(e) = self.recalculate_demand(restriction.as_ref()) {
            self.context.events().error(&e);
        }
        Ok(version)
    }

    /// Rebuild routes and demand in the background.
    ///
    /// Calls arriving while a pass is queued are folded into it. The task
    /// resolves to true if this call executed a pass.
    pub fn calculate_routing_tables(self: &Arc<Self>, restriction: Option<KeySet>) -> JoinHandle<bool> {
        *self.restriction.lock() = restriction;

        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let ran = this
                .recalc
                .run(|| {
                    let worker = Arc::clone(&this);
                    async move {
                        let result = tokio::task::spawn_blocking({
                            let worker = Arc::clone(&worker);
                            move || worker.recalculate_now()
                        })
                        .await;
                        match result {
                            Ok(Ok(version)) => debug!(version, "Routing tables recalculated"),
                            Ok(Err(RoutingError::ShutDown)) => {}
                            Ok(Err(e)) => worker.context.events().error(&e),
                            Err(e) => worker
                                .context
                                .events()
                                .error(&RoutingError::recalculation(format!("calculation task failed: {e}"))),
                        }
                    }
                })
                .await;
            ran.is_some()
        })
    }

    /// Route a producer's batch.
    ///
    /// Returns the number of (measurement, consumer) deliveries made, or with
    /// the high-latency strategy the number of measurements queued.
    pub fn route(&self, producer: &AdapterId, measurements: Vec<MeasurementRef>) -> Result<usize, RoutingError> {
        self.ensure_running()?;
        match &self.intake {
            Some(intake) => {
                let n = measurements.len();
                intake
                    .submit(Some(producer.clone()), measurements)
                    .then_some(n)
                    .ok_or(RoutingError::ShutDown)
            }
            None => {
                let cache = self.producer_cache(producer);
                Ok(self.context.dispatch(&cache, &measurements))
            }
        }
    }

    /// Route measurements that have no producer, through one shared cache.
    pub fn inject_measurements(&self, measurements: Vec<MeasurementRef>) -> Result<usize, RoutingError> {
        self.ensure_running()?;
        match &self.intake {
            Some(intake) => {
                let n = measurements.len();
                intake
                    .submit(None, measurements)
                    .then_some(n)
                    .ok_or(RoutingError::ShutDown)
            }
            None => Ok(self.context.dispatch(&self.inject_cache, &measurements)),
        }
    }

    /// `adapter` finished processing `measurement`.
    pub fn notify_processed(&self, adapter: &AdapterId, measurement: &MeasurementRef) {
        if self.context.is_shut_down() {
            return;
        }
        if self.context.snapshot.load().graph().dependents_of(adapter).is_empty() {
            return;
        }
        self.context
            .scheduler
            .notify_processed(adapter.clone(), Arc::clone(measurement));
    }

    /// Re-evaluate connect-on-demand against the registered adapters.
    #[instrument(name = "routing_demand", skip(self, restriction), fields(restricted = restriction.is_some()))]
    pub fn recalculate_demand(&self, restriction: Option<&KeySet>) -> Result<DemandPlan, RoutingError> {
        let registrations = self.registrations();
        let descriptors = registrations
            .iter()
            .map(describe)
            .collect::<Result<Vec<_>, _>>()?;

        let plan = DemandController::plan(&descriptors, restriction);
        let outcome = catch_unwind(AssertUnwindSafe(|| DemandController::apply(&plan, &registrations)))
            .map_err(|payload| {
                RoutingError::recalculation(format!(
                    "adapter panicked while applying demand: {}",
                    ContractError::adapter_panic("demand", payload.as_ref())
                ))
            })?;

        if outcome.started + outcome.stopped > 0 {
            info!(
                started = outcome.started,
                stopped = outcome.stopped,
                keys_updated = outcome.keys_updated,
                "Connect-on-demand adapters updated"
            );
        }
        Ok(plan)
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        EngineStats {
            version: snapshot.version(),
            routes: snapshot.route_count(),
            destinations: snapshot.destination_count(),
            producers: snapshot.producers().len(),
            pending_dependencies: self.context.scheduler.pending(),
            intake_queued: self.intake.as_ref().map_or(0, Intake::queued),
            recalculations: self.recalc.executions(),
            coalesced_recalculations: self.recalc.coalesced(),
            consumers: snapshot
                .consumers()
                .map(|h| (h.id().clone(), h.metrics().snapshot()))
                .collect(),
        }
    }

    /// Calculation and dependency timing summary.
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.stats.lock().summary()
    }

    /// Detach producers, flush pending work and stop every worker. Idempotent.
    #[instrument(name = "routing_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if !self.context.begin_shutdown() {
            return;
        }
        info!("Routing tables shutting down");

        let (producers, mut handles) = {
            let mut registry = self.registry.lock();
            let attached = std::mem::take(&mut registry.attached);
            let producers: Vec<AdapterRegistration> = registry
                .producers
                .iter()
                .filter(|(id, _)| attached.contains(*id))
                .map(|(_, r)| r.clone())
                .collect();
            let handles: BTreeMap<AdapterId, Arc<ConsumerHandle>> = registry
                .consumers
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(&slot.handle)))
                .collect();
            (producers, handles)
        };
        for registration in &producers {
            self.detach(registration);
        }

        if let Some(intake) = &self.intake {
            intake.shutdown().await;
        }
        let flushed = self.context.scheduler.shutdown().await;

        for handle in self.snapshot().consumers() {
            handles.entry(handle.id().clone()).or_insert_with(|| Arc::clone(handle));
        }
        for handle in handles.values() {
            handle.shutdown().await;
        }
        self.caches.write().clear();

        self.context.events().status(&format!(
            "Routing tables shut down, {flushed} pending measurement(s) flushed"
        ));
    }

    pub fn is_shut_down(&self) -> bool {
        self.context.is_shut_down()
    }

    fn ensure_running(&self) -> Result<(), RoutingError> {
        if self.context.is_shut_down() {
            return Err(RoutingError::ShutDown);
        }
        Ok(())
    }

    fn recalculate_now(&self) -> Result<u64, RoutingError> {
        self.ensure_running()?;
        let version = {
            let mut registry = self.registry.lock();
            self.rebuild(&mut registry)?
        };
        let restriction = self.restriction.lock().clone();
        self.recalculate_demand(restriction.as_ref())?;
        Ok(version)
    }

    /// Every registered adapter once, dual-role adapters included.
    fn registrations(&self) -> Vec<AdapterRegistration> {
        let registry = self.registry.lock();
        let mut all: BTreeMap<&AdapterId, &AdapterRegistration> = registry.producers.iter().collect();
        for (id, slot) in &registry.consumers {
            all.entry(id).or_insert(&slot.registration);
        }
        all.into_values().cloned().collect()
    }

    fn apply_patch(&self, registry: &mut Registry, patch: TopologyPatch) {
        for id in &patch.removed_consumers {
            if registry.consumers.remove(id).is_some() {
                debug!(consumer = %id, "Consumer removed");
            }
        }
        for id in &patch.removed_producers {
            if let Some(registration) = registry.producers.remove(id) {
                if registry.attached.remove(id) {
                    self.detach(&registration);
                }
                self.caches.write().remove(id);
                debug!(producer = %id, "Producer removed");
            }
        }

        for registration in patch.added_producers {
            if !registration.is_producer() {
                self.context.events().error(&RoutingError::topology(format!(
                    "adapter '{}' added as producer but has no measurement source, ignored",
                    registration.id()
                )));
                continue;
            }
            let id = registration.id().clone();
            let Some(previous) = registry.producers.insert(id.clone(), registration) else {
                continue;
            };
            if same_source(&previous, &registry.producers[&id]) {
                continue;
            }
            if registry.attached.remove(&id) {
                self.detach(&previous);
            }
            self.caches.write().remove(&id);
            debug!(producer = %id, "Producer instance replaced");
        }

        for registration in patch.added_consumers {
            let id = registration.id().clone();
            if let Some(slot) = registry.consumers.get_mut(&id) {
                if !slot.handle.is_closed() && same_sink(&slot.registration, &registration) {
                    slot.registration = registration;
                    continue;
                }
                // A different instance under the same id gets its own queue.
                slot.handle.close();
                debug!(consumer = %id, "Consumer instance replaced");
            }
            match self.spawn_consumer(&registration) {
                Some(handle) => {
                    registry.consumers.insert(id, ConsumerSlot { registration, handle });
                }
                None => self.context.events().error(&RoutingError::topology(format!(
                    "adapter '{id}' added as consumer but has no measurement sink, ignored"
                ))),
            }
        }
    }

    fn spawn_consumer(&self, registration: &AdapterRegistration) -> Option<Arc<ConsumerHandle>> {
        let sink = Arc::clone(registration.role.sink()?);
        let context = Arc::downgrade(&self.context);
        let on_failure: FailureCallback = Arc::new(move |id: &AdapterId, err: &DispatcherError| {
            observability::record_ingest_failure(id);
            if let Some(context) = context.upgrade() {
                context.events().error(&RoutingError::Delivery {
                    consumer: id.to_string(),
                    message: err.to_string(),
                });
            }
        });
        Some(ConsumerHandle::spawn(
            registration.id().clone(),
            sink,
            &self.config.drain,
            Some(on_failure),
            &self.runtime,
        ))
    }

    /// Build and publish the next snapshot from the registry.
    fn rebuild(&self, registry: &mut Registry) -> Result<u64, RoutingError> {
        let started = Instant::now();

        let mut entries = Vec::with_capacity(registry.consumers.len());
        let mut declared = Vec::new();
        for (id, slot) in &registry.consumers {
            let descriptor = describe(&slot.registration)
                .map_err(|e| RoutingError::recalculation(e.to_string()))?;
            let timeout = if descriptor.dependencies.is_empty() {
                None
            } else {
                descriptor
                    .dependency_timeout
                    .or_else(|| self.config.dependency.default_timeout())
            };
            entries.push(ConsumerEntry {
                handle: Arc::clone(&slot.handle),
                subscribed: descriptor.subscribed_keys,
                timeout,
            });
            if !descriptor.dependencies.is_empty() {
                declared.push((id.clone(), descriptor.dependencies));
            }
        }

        let known: BTreeSet<AdapterId> = registry
            .producers
            .keys()
            .chain(registry.consumers.keys())
            .cloned()
            .collect();
        let (graph, problems) = DependencyGraph::build(&known, declared);
        let events = self.context.events();
        for problem in &problems {
            events.error(problem);
        }

        let version = self.context.snapshot.load().version() + 1;
        let producers = registry.producers.keys().cloned().collect();
        let snapshot = RouteSnapshot::build(version, producers, entries, graph);
        let routes = snapshot.route_count();
        let destinations = snapshot.destination_count();
        self.context.snapshot.store(Arc::new(snapshot));

        let elapsed = started.elapsed();
        observability::record_route_calculation(elapsed, routes, destinations);
        observability::record_snapshot_version(version);
        self.stats.lock().record_calculation(elapsed);

        self.attach_new_producers(registry);

        events.status(&format!(
            "Calculated {routes} route{} for {destinations} destination{} in {:.3} seconds",
            plural(routes),
            plural(destinations),
            elapsed.as_secs_f64()
        ));
        Ok(version)
    }

    fn attach_new_producers(&self, registry: &mut Registry) {
        let pending: Vec<(AdapterId, AdapterRegistration)> = registry
            .producers
            .iter()
            .filter(|(id, _)| !registry.attached.contains(*id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();

        for (id, registration) in pending {
            let Some(source) = registration.role.source() else {
                continue;
            };
            let handler = self.handler_for(&id);
            let installed = catch_unwind(AssertUnwindSafe(|| source.set_new_measurements_handler(Some(handler))));
            match installed {
                Ok(()) => {
                    registry.attached.insert(id.clone());
                    debug!(producer = %id, "Route handler attached");
                }
                Err(payload) => self
                    .context
                    .events()
                    .error(&ContractError::adapter_panic(id.as_str(), payload.as_ref()).into()),
            }
        }
    }

    fn handler_for(&self, producer: &AdapterId) -> MeasurementHandler {
        match &self.intake {
            Some(intake) => intake.handler(producer.clone()),
            None => {
                let cache = self.producer_cache(producer);
                let context = Arc::downgrade(&self.context);
                Arc::new(move |batch: Vec<MeasurementRef>| {
                    if let Some(context) = context.upgrade() {
                        context.dispatch(&cache, &batch);
                    }
                })
            }
        }
    }

    fn detach(&self, registration: &AdapterRegistration) {
        if let Some(source) = registration.role.source() {
            if catch_unwind(AssertUnwindSafe(|| source.set_new_measurements_handler(None))).is_err() {
                warn!(producer = %registration.id(), "Producer panicked while detaching route handler");
            }
        }
    }

    fn producer_cache(&self, producer: &AdapterId) -> Arc<LocalRouteCache> {
        if let Some(cache) = self.caches.read().get(producer) {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write();
        Arc::clone(
            caches
                .entry(producer.clone())
                .or_insert_with(|| Arc::new(LocalRouteCache::new(Arc::clone(&self.context.snapshot)))),
        )
    }
}

impl Drop for RoutingTables {
    fn drop(&mut self) {
        if !self.context.begin_shutdown() {
            return;
        }
        let registry = self.registry.get_mut();
        let attached = std::mem::take(&mut registry.attached);
        let producers: Vec<AdapterRegistration> = attached
            .iter()
            .filter_map(|id| registry.producers.get(id).cloned())
            .collect();
        for registration in &producers {
            self.detach(registration);
        }
        if let Some(intake) = &self.intake {
            intake.close();
        }
    }
}

fn describe(registration: &AdapterRegistration) -> Result<AdapterDescriptor, RoutingError> {
    catch_unwind(AssertUnwindSafe(|| registration.describe()))
        .map_err(|payload| ContractError::adapter_panic(registration.id().as_str(), payload.as_ref()).into())
}

fn same_source(a: &AdapterRegistration, b: &AdapterRegistration) -> bool {
    match (a.role.source(), b.role.source()) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn same_sink(a: &AdapterRegistration, b: &AdapterRegistration) -> bool {
    match (a.role.sink(), b.role.sink()) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
