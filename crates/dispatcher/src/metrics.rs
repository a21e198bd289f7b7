//! Writer metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for the write path
#[derive(Debug, Default)]
pub struct WriterMetrics {
    /// Readings received from ingestion
    received: AtomicU64,
    /// Rows written
    persisted: AtomicU64,
    /// Inserts that found the reading id already stored
    duplicates: AtomicU64,
    /// Retries after transient store errors
    retries: AtomicU64,
    /// Readings handed to the dead letter sink
    dead_lettered: AtomicU64,
    /// Dead letter writes that failed
    dead_letter_failures: AtomicU64,
    /// Writes currently running
    in_flight: AtomicUsize,
    /// Highest `in_flight` observed
    peak_in_flight: AtomicUsize,
}

impl WriterMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dead_letter_failures(&self) {
        self.dead_letter_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a write as started, returning the new in-flight count
    pub fn enter_write(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        now
    }

    /// Mark a write as finished, returning the new in-flight count
    pub fn exit_write(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dead_letter_failures: self.dead_letter_failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Snapshot of writer metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub retries: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_tracks_peak() {
        let metrics = WriterMetrics::new();
        assert_eq!(metrics.enter_write(), 1);
        assert_eq!(metrics.enter_write(), 2);
        assert_eq!(metrics.exit_write(), 1);
        assert_eq!(metrics.enter_write(), 2);
        metrics.exit_write();
        metrics.exit_write();

        let snap = metrics.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.peak_in_flight, 2);
    }
}
