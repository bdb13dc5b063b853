//! Routing error types

use thiserror::Error;

/// Routing-specific errors
///
/// None of these stop the engine; they are reported through
/// [`EngineEvents`](crate::EngineEvents) and routing carries on.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Declared dependency names an adapter that is not registered
    #[error("adapter '{adapter}' depends on unknown adapter '{dependency}', ignored")]
    UnresolvedDependency { adapter: String, dependency: String },

    /// Malformed topology, the offending reference is dropped
    #[error("topology error: {message}")]
    Topology { message: String },

    /// Consumer rejected a batch
    #[error("delivery to '{consumer}' failed: {message}")]
    Delivery { consumer: String, message: String },

    /// Route table calculation failed, the previous snapshot stays active
    #[error("routing tables calculation error: {message}")]
    Recalculation { message: String },

    /// Engine already shut down
    #[error("routing engine is shut down")]
    ShutDown,

    /// No tokio runtime to host the engine's workers
    #[error("routing engine requires a tokio runtime: {0}")]
    Runtime(String),

    /// Error from contract
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// Error from dispatcher
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] dispatcher::DispatcherError),
}

impl RoutingError {
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    pub fn recalculation(message: impl Into<String>) -> Self {
        Self::Recalculation {
            message: message.into(),
        }
    }

    pub fn unresolved(adapter: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnresolvedDependency {
            adapter: adapter.into(),
            dependency: dependency.into(),
        }
    }
}
