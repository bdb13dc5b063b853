//! Layered error definitions
//!
//! Categorized by source: config / adapter / topology

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Adapter Errors =====
    /// Consumer rejected a batch
    #[error("adapter '{adapter}' ingest error: {message}")]
    Ingest { adapter: String, message: String },

    /// Adapter panicked inside a callback
    #[error("adapter '{adapter}' panicked: {message}")]
    AdapterPanic { adapter: String, message: String },

    /// Adapter referenced by name does not exist
    #[error("adapter not found: {adapter}")]
    AdapterNotFound { adapter: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create ingest error
    pub fn ingest(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ingest {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Create adapter panic error from a `catch_unwind` payload
    pub fn adapter_panic(adapter: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::AdapterPanic {
            adapter: adapter.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = ContractError::adapter_panic("archive", payload.as_ref());
        assert_eq!(err.to_string(), "adapter 'archive' panicked: boom");
    }

    #[test]
    fn test_validation_display() {
        let err = ContractError::config_validation("engine.drain_batch_size", "must be > 0");
        assert!(err.to_string().contains("engine.drain_batch_size"));
    }
}
