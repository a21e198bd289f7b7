//! # Contracts
//!
//! Frozen interface contracts shared by every bridge crate: readings, broker
//! state, configuration model, errors and persistence traits.
//! All business crates depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - `received_at` is ingestion wall-clock time (UTC); devices send no clock
//! - `reading_id` is the idempotency key of a reading

mod bridge_config;
mod connection;
mod device_id;
mod error;
mod reading;
mod store;

pub use bridge_config::*;
pub use connection::{BackoffConfig, ConnectionState};
pub use device_id::{DeviceId, MAX_DEVICE_ID_LEN};
pub use error::*;
pub use reading::*;
pub use store::*;
