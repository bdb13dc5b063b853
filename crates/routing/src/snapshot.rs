//! RouteSnapshot - immutable, versioned signal -> consumer mapping
//!
//! Built once per topology change and published by pointer swap. Nothing in
//! here is mutated after [`RouteSnapshot::build`] returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use contracts::{AdapterId, KeySet, SignalKey};
use dispatcher::ConsumerHandle;

use crate::graph::DependencyGraph;

/// Dependency gate attached to one (consumer, signal) route.
#[derive(Debug, Clone)]
pub struct Gate {
    /// Dependencies that also receive this signal
    pub required: Arc<[AdapterId]>,
    pub timeout: Duration,
}

/// One consumer on a signal's route.
#[derive(Debug, Clone)]
pub struct Destination {
    pub handle: Arc<ConsumerHandle>,
    /// Present when delivery must wait for other consumers
    pub gate: Option<Gate>,
}

impl Destination {
    pub fn id(&self) -> &AdapterId {
        self.handle.id()
    }
}

/// Consumer as seen by the snapshot builder.
pub(crate) struct ConsumerEntry {
    pub handle: Arc<ConsumerHandle>,
    pub subscribed: Option<KeySet>,
    pub timeout: Option<Duration>,
}

/// Immutable routing table.
#[derive(Debug)]
pub struct RouteSnapshot {
    version: u64,
    /// Keyed routes; broadcast consumers are already appended to every list
    signal_routes: HashMap<SignalKey, Arc<[Destination]>>,
    broadcast: Arc<[Destination]>,
    consumers: BTreeMap<AdapterId, Arc<ConsumerHandle>>,
    producers: BTreeSet<AdapterId>,
    graph: DependencyGraph,
}

impl RouteSnapshot {
    /// Version 0, no routes.
    pub fn empty() -> Self {
        Self {
            version: 0,
            signal_routes: HashMap::new(),
            broadcast: Arc::from(Vec::new()),
            consumers: BTreeMap::new(),
            producers: BTreeSet::new(),
            graph: DependencyGraph::default(),
        }
    }

    pub(crate) fn build(
        version: u64,
        producers: BTreeSet<AdapterId>,
        consumers: Vec<ConsumerEntry>,
        graph: DependencyGraph,
    ) -> Self {
        let mut keyed: HashMap<SignalKey, Vec<usize>> = HashMap::new();
        let mut broadcast_idx = Vec::new();

        for (idx, consumer) in consumers.iter().enumerate() {
            match &consumer.subscribed {
                Some(keys) => {
                    for key in keys {
                        keyed.entry(key.clone()).or_default().push(idx);
                    }
                }
                None => broadcast_idx.push(idx),
            }
        }

        let destinations = |members: &[usize]| -> Arc<[Destination]> {
            members
                .iter()
                .map(|&idx| {
                    let consumer = &consumers[idx];
                    let id = consumer.handle.id();
                    let gate = consumer.timeout.and_then(|timeout| {
                        let required: Vec<AdapterId> = graph
                            .dependencies_of(id)
                            .iter()
                            .filter(|dep| members.iter().any(|&m| consumers[m].handle.id() == *dep))
                            .cloned()
                            .collect();
                        (!required.is_empty()).then(|| Gate {
                            required: Arc::from(required),
                            timeout,
                        })
                    });
                    Destination {
                        handle: Arc::clone(&consumer.handle),
                        gate,
                    }
                })
                .collect()
        };

        let signal_routes = keyed
            .into_iter()
            .map(|(key, mut members)| {
                members.extend_from_slice(&broadcast_idx);
                (key, destinations(&members))
            })
            .collect();
        let broadcast = destinations(&broadcast_idx);

        let consumers = consumers
            .iter()
            .map(|c| (c.handle.id().clone(), Arc::clone(&c.handle)))
            .collect();

        Self {
            version,
            signal_routes,
            broadcast,
            consumers,
            producers,
            graph,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Consumers for `key`: its keyed route, or the broadcast consumers alone.
    pub fn destinations_for(&self, key: &SignalKey) -> Arc<[Destination]> {
        self.signal_routes
            .get(key)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.broadcast))
    }

    /// Consumer names that receive `key`, in delivery order.
    pub fn consumer_ids_for(&self, key: &SignalKey) -> Vec<AdapterId> {
        self.destinations_for(key)
            .iter()
            .map(|d| d.id().clone())
            .collect()
    }

    pub fn consumer(&self, id: &AdapterId) -> Option<&Arc<ConsumerHandle>> {
        self.consumers.get(id)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Arc<ConsumerHandle>> {
        self.consumers.values()
    }

    pub fn broadcast_ids(&self) -> Vec<AdapterId> {
        self.broadcast.iter().map(|d| d.id().clone()).collect()
    }

    pub fn producers(&self) -> &BTreeSet<AdapterId> {
        &self.producers
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of keyed routes
    pub fn route_count(&self) -> usize {
        self.signal_routes.len()
    }

    /// Number of consumers
    pub fn destination_count(&self) -> usize {
        self.consumers.len()
    }
}

impl Default for RouteSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
