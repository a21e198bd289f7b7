//! DeadLetterHandle - owns the dead letter sink in its own worker task

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use contracts::{DeadLetter, DeadLetterSink};

use crate::metrics::WriterMetrics;

/// Handle to a running dead letter worker
///
/// Write tasks hand letters over through a bounded queue; sends wait for
/// room instead of dropping.
pub struct DeadLetterHandle {
    /// Sink name
    name: String,
    /// Channel to send letters to worker
    tx: mpsc::Sender<DeadLetter>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl DeadLetterHandle {
    /// Create a new DeadLetterHandle and spawn the worker task
    pub fn spawn<D: DeadLetterSink + 'static>(
        sink: D,
        queue_capacity: usize,
        metrics: Arc<WriterMetrics>,
    ) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let worker_name = name.clone();

        let worker_handle = tokio::spawn(async move {
            dead_letter_worker(sink, rx, metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            worker_handle,
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sender for write tasks
    pub fn sender(&self) -> DeadLetterSender {
        DeadLetterSender {
            tx: self.tx.clone(),
        }
    }

    /// Wait for queued letters to be written, then flush and close the sink
    #[instrument(name = "dead_letter_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        // Drop sender to signal worker to stop
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "DeadLetterHandle shutdown complete");
    }
}

/// Cloneable sending side of a `DeadLetterHandle`
#[derive(Clone)]
pub struct DeadLetterSender {
    tx: mpsc::Sender<DeadLetter>,
}

impl DeadLetterSender {
    /// Queue a letter. Returns it back if the worker is gone.
    pub async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetter> {
        self.tx.send(letter).await.map_err(|e| e.0)
    }
}

/// Worker task that consumes letters and writes to sink
#[instrument(
    name = "dead_letter_worker_loop",
    skip(sink, rx, metrics),
    fields(sink = %name)
)]
async fn dead_letter_worker<D: DeadLetterSink>(
    mut sink: D,
    mut rx: mpsc::Receiver<DeadLetter>,
    metrics: Arc<WriterMetrics>,
    name: String,
) {
    debug!(sink = %name, "Dead letter worker started");

    while let Some(letter) = rx.recv().await {
        match sink.write(&letter).await {
            Ok(()) => {
                metrics.inc_dead_lettered();
                observability::metrics::record_dead_lettered();
            }
            Err(e) => {
                metrics.inc_dead_letter_failures();
                observability::metrics::record_dead_letter_failure();
                // Last resort: the reading only survives in this log line.
                error!(
                    sink = %name,
                    reading_id = %letter.reading.reading_id,
                    device_id = %letter.reading.device_id,
                    sensor_type = %letter.reading.sensor_type,
                    value = letter.reading.value,
                    store_error = %letter.error,
                    error = %e,
                    "Dead letter write failed, reading lost"
                );
            }
        }
    }

    // Cleanup
    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }

    debug!(sink = %name, "Dead letter worker stopped");
}
