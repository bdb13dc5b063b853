//! # Adapters
//!
//! Reference implementations of the adapter capability contract, used by the
//! CLI demo harness and by tests.
//!
//! - [`SyntheticProducer`] / [`ManualProducer`]: measurement sources
//! - [`CollectingConsumer`] / [`LogConsumer`]: measurement sinks
//! - [`RelayAdapter`]: dual-role adapter
//! - [`build_topology`]: adapters from blueprint configuration

mod macros;

pub mod builder;
pub mod consumer;
pub mod producer;
pub mod relay;
pub mod state;

pub use builder::{build_adapter, build_topology, BuiltAdapter};
pub use consumer::{CollectingConsumer, IngestHook, LogConsumer};
pub use producer::{ManualProducer, SyntheticProducer};
pub use relay::RelayAdapter;
pub use state::{AdapterCounters, AdapterSettings, AdapterState};
