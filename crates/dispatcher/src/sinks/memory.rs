//! In-memory store and dead letter sink
//!
//! Used by tests. Failures can be injected to simulate
//! store outages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{
    ContractError, DeadLetter, DeadLetterSink, InsertOutcome, ReadingStore, SensorReading,
};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Rows {
    readings: Vec<SensorReading>,
    ids: HashSet<Uuid>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Mutex<Rows>,
    /// Transient failures to return before touching the rows
    fail_next: AtomicU32,
    /// Transient failures to return after the row was written
    fail_after_write: AtomicU32,
    /// Every insert fails with a permanent error
    reject_all: AtomicBool,
    attempts: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    closed: AtomicBool,
}

/// Store keeping rows in memory, deduplicated by `reading_id`.
///
/// Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    delay: Option<Duration>,
    state: Arc<MemoryState>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            state: Arc::default(),
        }
    }

    /// Make every insert take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `count` inserts with a transient error
    pub fn fail_next(&self, count: u32) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    /// Write the row, then report a transient error, `count` times
    ///
    /// Simulates a connection dropped after the server committed.
    pub fn fail_after_write(&self, count: u32) {
        self.state.fail_after_write.store(count, Ordering::SeqCst);
    }

    /// Reject every insert with a permanent error
    pub fn reject_all(&self, reject: bool) {
        self.state.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        self.state
            .rows
            .lock()
            .map(|rows| rows.readings.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state
            .rows
            .lock()
            .map(|rows| rows.readings.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, reading_id: &Uuid) -> bool {
        self.state
            .rows
            .lock()
            .map(|rows| rows.ids.contains(reading_id))
            .unwrap_or(false)
    }

    /// Total insert calls, including failed ones
    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent inserts observed
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn store_row(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError> {
        let mut rows = self
            .state
            .rows
            .lock()
            .map_err(|_| ContractError::store_permanent(&self.name, "row lock poisoned"))?;
        if !rows.ids.insert(reading.reading_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.readings.push(reading.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn insert_inner(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(ContractError::store_permanent(&self.name, "store closed"));
        }
        if self.state.reject_all.load(Ordering::SeqCst) {
            return Err(ContractError::store_permanent(
                &self.name,
                "Unknown column 'value' in 'field list'",
            ));
        }
        if Self::take_failure(&self.state.fail_next) {
            return Err(ContractError::store_transient(&self.name, "pool timed out"));
        }

        let outcome = self.store_row(reading)?;
        if Self::take_failure(&self.state.fail_after_write) {
            return Err(ContractError::store_transient(
                &self.name,
                "connection reset after commit",
            ));
        }
        Ok(outcome)
    }
}

impl ReadingStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), ContractError> {
        self.state.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.insert_inner(reading).await;

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn is_healthy(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ContractError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LetterState {
    letters: Mutex<Vec<DeadLetter>>,
    fail_writes: AtomicBool,
    flushed: AtomicBool,
    closed: AtomicBool,
}

/// Dead letter sink collecting letters in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeadLetter {
    name: String,
    state: Arc<LetterState>,
}

impl MemoryDeadLetter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.state
            .letters
            .lock()
            .map(|letters| letters.clone())
            .unwrap_or_default()
    }

    pub fn is_flushed(&self) -> bool {
        self.state.flushed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl DeadLetterSink for MemoryDeadLetter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, letter: &DeadLetter) -> Result<(), ContractError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(ContractError::dead_letter_write(&self.name, "disk full"));
        }
        let mut letters = self
            .state
            .letters
            .lock()
            .map_err(|_| ContractError::dead_letter_write(&self.name, "lock poisoned"))?;
        letters.push(letter.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        self.state.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading() -> SensorReading {
        SensorReading::new("esp32_1".into(), "temperature", 23.5, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new("memory");
        let r = reading();
        assert_eq!(store.insert(&r).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&r).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&r.reading_id));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new("memory");
        store.fail_next(2);
        let r = reading();
        assert!(store.insert(&r).await.unwrap_err().is_transient());
        assert!(store.insert(&r).await.unwrap_err().is_transient());
        assert!(store.insert(&r).await.is_ok());
        assert_eq!(store.attempts(), 3);

        store.reject_all(true);
        assert!(!store.insert(&reading()).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_fail_after_write_keeps_row() {
        let store = MemoryStore::new("memory");
        store.fail_after_write(1);
        let r = reading();
        assert!(store.insert(&r).await.is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert(&r).await.unwrap(), InsertOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_memory_dead_letter() {
        let mut sink = MemoryDeadLetter::new("dlq");
        let letter = DeadLetter::new(reading(), "pool timed out", 5);
        sink.write(&letter).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(sink.letters().len(), 1);
        assert!(sink.is_closed());
    }
}
