//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Enqueue after the consumer was closed
    #[error("consumer queue closed")]
    QueueClosed,

    /// Consumer failed to ingest a batch, which was dropped
    #[error("consumer '{consumer}' dropped batch of {batch_len}: {source}")]
    BatchDropped {
        consumer: String,
        batch_len: usize,
        #[source]
        source: contracts::ContractError,
    },

    /// Drain worker task died
    #[error("drain worker for '{consumer}' failed: {message}")]
    Worker { consumer: String, message: String },

    /// Error from contract
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create a dropped batch error
    pub fn batch_dropped(
        consumer: impl Into<String>,
        batch_len: usize,
        source: contracts::ContractError,
    ) -> Self {
        Self::BatchDropped {
            consumer: consumer.into(),
            batch_len,
            source,
        }
    }
}
