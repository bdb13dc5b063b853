//! Error types for CLI operations.

use thiserror::Error;

use contracts::ContractError;
use routing::RoutingError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Adapters could not be built from the configuration
    #[error("Failed to build topology: {0}")]
    Topology(#[from] ContractError),

    /// Routing engine failure
    #[error("Routing engine error: {0}")]
    Routing(#[from] RoutingError),

    /// Background task failure
    #[error("Task failed: {message}")]
    Task { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
