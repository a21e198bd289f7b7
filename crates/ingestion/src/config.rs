//! Ingestion metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Ingestion metrics
///
/// Shared between the broker session (receive side) and the decoding
/// pipeline; all counters are monotonic.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total messages handed over by the broker
    pub messages_received: AtomicU64,

    /// Messages dropped for a bad topic
    pub malformed_topics: AtomicU64,

    /// Messages dropped for a bad payload
    pub malformed_payloads: AtomicU64,

    /// Readings forwarded to the dispatcher
    pub readings_decoded: AtomicU64,

    /// Threshold breaches raised
    pub threshold_breaches: AtomicU64,

    /// Transport failures that led to a backoff
    pub reconnects: AtomicU64,

    /// Current raw message queue length
    pub queue_len: AtomicUsize,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_topic(&self) {
        self.malformed_topics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoded(&self) {
        self.readings_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breach(&self) {
        self.threshold_breaches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Update queue length
    pub fn update_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            malformed_topics: self.malformed_topics.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            readings_decoded: self.readings_decoded.load(Ordering::Relaxed),
            threshold_breaches: self.threshold_breaches.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub malformed_topics: u64,
    pub malformed_payloads: u64,
    pub readings_decoded: u64,
    pub threshold_breaches: u64,
    pub reconnects: u64,
    pub queue_len: usize,
}

impl MetricsSnapshot {
    /// Messages discarded before reaching the store
    pub fn malformed(&self) -> u64 {
        self.malformed_topics + self.malformed_payloads
    }
}
