//! Persistence traits - dispatcher output interfaces
//!
//! `ReadingStore` is the primary store, `DeadLetterSink` receives readings
//! the store could not take.

use crate::{ContractError, DeadLetter, InsertOutcome, SensorReading};

/// Durable store for sensor readings.
///
/// Methods take `&self` so one store can serve several concurrent writes;
/// implementations own their connection handles and reconnect internally.
#[trait_variant::make(ReadingStore: Send)]
pub trait LocalReadingStore {
    /// Store name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Open connections / verify reachability
    ///
    /// # Errors
    /// Returns a connection error if the store cannot be reached
    async fn connect(&self) -> Result<(), ContractError>;

    /// Insert one reading
    ///
    /// Inserting a reading whose `reading_id` is already stored must not
    /// create a second row and reports `InsertOutcome::Duplicate`.
    async fn insert(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError>;

    /// Cheap liveness probe
    async fn is_healthy(&self) -> bool;

    /// Release all connections
    async fn close(&self) -> Result<(), ContractError>;
}

/// Fallback output for readings that exhausted their retries.
#[trait_variant::make(DeadLetterSink: Send)]
pub trait LocalDeadLetterSink {
    fn name(&self) -> &str;

    async fn write(&mut self, letter: &DeadLetter) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    async fn close(&mut self) -> Result<(), ContractError>;
}
