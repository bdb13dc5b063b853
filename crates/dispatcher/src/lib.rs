//! # Dispatcher
//!
//! Per-consumer delivery.
//!
//! Responsibilities:
//! - Accept routed measurements from many producer threads without blocking
//! - Drain each consumer on its own single-flight worker, in batches
//! - Isolate failing or panicking consumers from everyone else

pub mod error;
pub mod handle;
pub mod metrics;
pub mod queue;

pub use error::DispatcherError;
pub use handle::{ConsumerHandle, FailureCallback};
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use queue::{DoubleBufferedQueue, DrainOutcome, QueueProducer};
