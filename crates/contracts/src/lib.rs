//! # Contracts
//!
//! Frozen interface contracts shared by every routing crate: the measurement
//! model, the adapter capability contract, errors and engine configuration.
//! All business crates depend only on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Measurements carry a UTC source timestamp (`chrono::DateTime<Utc>`)
//! - Dependency timeouts are measured from that timestamp, not from arrival

mod adapter;
mod adapter_id;
mod blueprint;
mod engine_config;
mod error;
mod measurement;

pub use adapter::*;
pub use adapter_id::AdapterId;
pub use blueprint::*;
pub use engine_config::*;
pub use error::*;
pub use measurement::*;
