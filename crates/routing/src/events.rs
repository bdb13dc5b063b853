//! Host-facing status and error callbacks

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::RoutingError;

pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&RoutingError) + Send + Sync>;

/// Status and error sinks registered by the host.
///
/// Every message is also emitted as a `tracing` event, so hosts without
/// callbacks still see them in the log.
#[derive(Clone, Default)]
pub struct EngineEvents {
    on_status: Option<StatusCallback>,
    on_error: Option<ErrorCallback>,
}

impl EngineEvents {
    pub fn new(on_status: Option<StatusCallback>, on_error: Option<ErrorCallback>) -> Self {
        Self {
            on_status,
            on_error,
        }
    }

    pub fn status(&self, message: &str) {
        info!(target: "routing::status", "{message}");
        if let Some(cb) = &self.on_status {
            cb(message);
        }
    }

    pub fn error(&self, err: &RoutingError) {
        match err {
            RoutingError::UnresolvedDependency { .. } | RoutingError::Topology { .. } => {
                warn!(error = %err, "Topology problem")
            }
            _ => error!(error = %err, "Routing error"),
        }
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }
}

impl fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEvents")
            .field("on_status", &self.on_status.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
