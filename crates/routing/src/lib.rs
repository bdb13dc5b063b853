//! # Routing
//!
//! Measurement routing engine.
//!
//! - [`RoutingTables`]: adapter registry, versioned route snapshots and fan-out
//! - [`LocalRouteCache`]: per-producer route lookups tagged with a snapshot version
//! - [`DependencyScheduler`]: dependency-ordered delivery with timeouts
//! - [`DemandController`]: connect-on-demand start/stop decisions
//! - [`SingleFlight`]: coalesced route recalculation
//!
//! ## Example
//!
//! ```ignore
//! use routing::{RoutingTables, TopologyPatch};
//!
//! let tables = RoutingTables::new(EngineConfig::default())?;
//! tables.initialize(None, None);
//! tables.patch_routing_table(
//!     TopologyPatch::new()
//!         .add(AdapterRegistration::producer(source))
//!         .add(AdapterRegistration::consumer(archive)),
//! )?;
//! ```

mod context;
pub mod demand;
pub mod dependency;
pub mod error;
pub mod events;
pub mod graph;
pub mod local_cache;
pub mod single_flight;
pub mod snapshot;
mod strategy;
pub mod tables;

pub use demand::{DemandController, DemandDecision, DemandOutcome, DemandPlan};
pub use dependency::{DependencyScheduler, Release};
pub use error::RoutingError;
pub use events::{EngineEvents, ErrorCallback, StatusCallback};
pub use graph::DependencyGraph;
pub use local_cache::{GateEntry, LocalRouteCache, ResolvedBatch};
pub use single_flight::SingleFlight;
pub use snapshot::{Destination, Gate, RouteSnapshot};
pub use tables::{EngineStats, RoutingTables, TopologyPatch};
