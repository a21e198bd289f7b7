//! Log-only store and dead letter sink

use contracts::{
    ContractError, DeadLetter, DeadLetterSink, InsertOutcome, ReadingStore, SensorReading,
};
use tracing::{error, info, instrument};

/// Store that logs readings instead of persisting them
pub struct LogStore {
    name: String,
}

impl LogStore {
    /// Create a new LogStore with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ReadingStore for LogStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(
        name = "log_store_insert",
        skip(self, reading),
        fields(store = %self.name, reading_id = %reading.reading_id)
    )]
    async fn insert(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError> {
        info!(
            device_id = %reading.device_id,
            sensor_type = %reading.sensor_type,
            value = reading.value,
            received_at = %reading.received_at,
            "reading"
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), ContractError> {
        info!(store = %self.name, "LogStore closed");
        Ok(())
    }
}

/// Dead letter sink writing one error-level line per letter
pub struct LogDeadLetter {
    name: String,
}

impl LogDeadLetter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DeadLetterSink for LogDeadLetter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, letter: &DeadLetter) -> Result<(), ContractError> {
        let reading = &letter.reading;
        error!(
            sink = %self.name,
            reading_id = %reading.reading_id,
            device_id = %reading.device_id,
            sensor_type = %reading.sensor_type,
            value = reading.value,
            received_at = %reading.received_at,
            attempts = letter.attempts,
            error = %letter.error,
            "dead letter"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogDeadLetter closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_log_store_accepts_everything() {
        let store = LogStore::new("log");
        let reading = SensorReading::new("esp32_1".into(), "motion", 1.0, Utc::now());
        assert_eq!(store.insert(&reading).await.unwrap(), InsertOutcome::Inserted);
        assert!(store.is_healthy().await);
        assert_eq!(store.name(), "log");
    }

    #[tokio::test]
    async fn test_log_dead_letter_write() {
        let mut sink = LogDeadLetter::new("dlq_log");
        let reading = SensorReading::new("esp32_1".into(), "motion", 1.0, Utc::now());
        let letter = DeadLetter::new(reading, "duplicate key", 1);
        assert!(sink.write(&letter).await.is_ok());
        assert!(sink.close().await.is_ok());
    }
}
