//! SensorReading - ingestion output
//!
//! A reading is built once from a broker message and never mutated.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DeviceId;

/// Longest sensor type, in bytes, that a store column holds
pub const MAX_SENSOR_TYPE_LEN: usize = 64;

/// Raw broker message, before decoding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Topic the message was published on
    pub topic: String,

    /// Payload bytes as delivered by the broker
    pub payload: Bytes,

    /// Ingestion time, assigned when the transport hands the message over
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// One parsed sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Idempotency key: retried inserts of the same reading collapse to one row
    pub reading_id: Uuid,

    /// Reporting device
    pub device_id: DeviceId,

    /// Category taken from the topic path, never empty
    pub sensor_type: String,

    /// Measurement, always finite
    pub value: f64,

    /// Ingestion timestamp (devices do not send their own clock)
    pub received_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        device_id: DeviceId,
        sensor_type: impl Into<String>,
        value: f64,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reading_id: Uuid::new_v4(),
            device_id,
            sensor_type: sensor_type.into(),
            value,
            received_at,
        }
    }
}

/// A reading that could not be persisted, kept for later inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub reading: SensorReading,

    /// Last store error
    pub error: String,

    /// Insert attempts made before giving up
    pub attempts: u32,

    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(reading: SensorReading, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            reading,
            error: error.into(),
            attempts,
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Result of a successful store insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written
    Inserted,
    /// The reading id already existed, nothing was written
    Duplicate,
}
