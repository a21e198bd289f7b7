//! Bridge run statistics.

use std::time::Duration;

use contracts::ConnectionState;
use observability::ReadingSummary;

/// Statistics from one bridge run
#[derive(Debug, Clone)]
pub struct BridgeStats {
    /// Wall-clock time from start to fully drained
    pub duration: Duration,

    /// Broker state after shutdown
    pub final_state: ConnectionState,

    /// Broker and decoding counters
    pub ingestion: ingestion::MetricsSnapshot,

    /// Store and dead letter counters
    pub writer: dispatcher::MetricsSnapshot,

    /// Per-sensor value statistics
    pub readings: ReadingSummary,
}

impl BridgeStats {
    /// Persisted readings per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.writer.persisted as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of received messages that could not be decoded, in percent
    pub fn malformed_rate(&self) -> f64 {
        let received = self.ingestion.messages_received;
        if received > 0 {
            (self.ingestion.malformed() as f64 / received as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Bridge Statistics ===\n");

        println!("Overview");
        println!("  Duration: {:.2}s", self.duration.as_secs_f64());
        println!("  Final broker state: {}", self.final_state);
        println!("  Reconnects: {}", self.ingestion.reconnects);

        println!("\nIngestion");
        println!("  Messages received: {}", self.ingestion.messages_received);
        println!("  Readings decoded: {}", self.ingestion.readings_decoded);
        println!(
            "  Malformed: {} topic, {} payload ({:.2}%)",
            self.ingestion.malformed_topics,
            self.ingestion.malformed_payloads,
            self.malformed_rate()
        );
        println!("  Threshold breaches: {}", self.ingestion.threshold_breaches);

        println!("\nStore");
        println!("  Persisted: {}", self.writer.persisted);
        println!("  Duplicates resolved: {}", self.writer.duplicates);
        println!("  Retries: {}", self.writer.retries);
        println!("  Dead-lettered: {}", self.writer.dead_lettered);
        if self.writer.dead_letter_failures > 0 {
            println!("  Dead letter failures: {}", self.writer.dead_letter_failures);
        }
        println!("  Peak concurrent writes: {}", self.writer.peak_in_flight);
        println!("  Throughput: {:.2} readings/s", self.throughput());

        println!("\n{}", self.readings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_no_traffic() {
        let stats = BridgeStats {
            duration: Duration::ZERO,
            final_state: ConnectionState::Disconnected,
            ingestion: ingestion::MetricsSnapshot::default(),
            writer: dispatcher::MetricsSnapshot::default(),
            readings: ReadingSummary::default(),
        };
        assert_eq!(stats.throughput(), 0.0);
        assert_eq!(stats.malformed_rate(), 0.0);
    }
}
