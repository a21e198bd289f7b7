//! Per-reading insert with capped exponential retry

use contracts::{BackoffConfig, ContractError, InsertOutcome, ReadingStore, SensorReading};
use tracing::{debug, warn};

use crate::metrics::WriterMetrics;

/// Final result of persisting one reading
#[derive(Debug)]
pub enum WriteOutcome {
    /// Stored; `duplicate` means an earlier ambiguous attempt had already
    /// committed the row
    Persisted { attempts: u32, duplicate: bool },
    /// Retries exhausted or the error was permanent
    Failed { attempts: u32, error: ContractError },
}

impl WriteOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Persisted { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Insert `reading`, retrying transient errors per `policy`.
///
/// `policy.max_attempts` counts the first attempt. Permanent errors are
/// returned after a single attempt.
pub async fn persist_with_retry<S: ReadingStore>(
    store: &S,
    reading: &SensorReading,
    policy: &BackoffConfig,
    metrics: &WriterMetrics,
) -> WriteOutcome {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match store.insert(reading).await {
            Ok(outcome) => {
                let duplicate = outcome == InsertOutcome::Duplicate;
                debug!(
                    reading_id = %reading.reading_id,
                    attempt,
                    duplicate,
                    "reading stored"
                );
                return WriteOutcome::Persisted {
                    attempts: attempt,
                    duplicate,
                };
            }
            Err(error) if error.is_transient() && policy.allows_retry(attempt) => {
                let delay = policy.delay_for(attempt);
                metrics.inc_retries();
                observability::metrics::record_store_retry();
                warn!(
                    store = store.name(),
                    reading_id = %reading.reading_id,
                    sensor_type = %reading.sensor_type,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "store write failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return WriteOutcome::Failed {
                    attempts: attempt,
                    error,
                };
            }
        }
    }
}
