//! Ingestion Pipeline main entry

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use contracts::{BridgeConfig, ContractError, ErrorKind, RawMessage, SensorReading};
use observability::ReadingStatsAggregator;
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::decode::MessageDecoder;
use crate::thresholds::{AlertTracker, AlertTransition, ThresholdBreach, ThresholdEvaluator};

/// Ingestion Pipeline
///
/// Pulls raw messages from the broker channel, decodes them, evaluates
/// thresholds and forwards valid readings to the dispatcher channel.
/// Malformed messages are logged and dropped; they never stop the loop.
/// Every breaching reading is counted, but only the first of a run is
/// logged at `warn`.
pub struct IngestionPipeline {
    decoder: MessageDecoder,
    thresholds: ThresholdEvaluator,
    alerts: AlertTracker,
    metrics: Arc<IngestionMetrics>,
    stats: ReadingStatsAggregator,
}

impl IngestionPipeline {
    pub fn new(decoder: MessageDecoder, thresholds: ThresholdEvaluator) -> Self {
        Self {
            decoder,
            thresholds,
            alerts: AlertTracker::new(),
            metrics: Arc::new(IngestionMetrics::new()),
            stats: ReadingStatsAggregator::new(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            MessageDecoder::from_config(config),
            ThresholdEvaluator::new(&config.thresholds),
        )
    }

    /// Share metrics with the broker session
    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    /// Decode one message, returning the reading if it is valid
    pub fn process(&mut self, message: &RawMessage) -> Option<SensorReading> {
        let reading = match self.decoder.decode(message) {
            Ok(reading) => reading,
            Err(e) => {
                self.record_malformed(message, &e);
                return None;
            }
        };

        let breaches = self.thresholds.evaluate(&reading);
        let transition = self.alerts.observe(&reading, !breaches.is_empty());
        for breach in &breaches {
            self.record_breach(&reading, breach, transition);
        }
        if transition == AlertTransition::Cleared {
            info!(
                sensor_type = %reading.sensor_type,
                device_id = %reading.device_id,
                value = reading.value,
                "threshold alert cleared"
            );
        }

        self.metrics.record_decoded();
        self.stats.update(&reading.sensor_type, reading.value);
        debug!(
            sensor_type = %reading.sensor_type,
            device_id = %reading.device_id,
            value = reading.value,
            reading_id = %reading.reading_id,
            "reading decoded"
        );
        Some(reading)
    }

    fn record_malformed(&self, message: &RawMessage, error: &ContractError) {
        let kind = error.kind();
        match kind {
            ErrorKind::MalformedTopic => self.metrics.record_malformed_topic(),
            _ => self.metrics.record_malformed_payload(),
        }
        observability::metrics::record_message_malformed(kind.as_str());
        warn!(
            topic = %message.topic,
            kind = kind.as_str(),
            error = %error,
            "discarding malformed message"
        );
    }

    fn record_breach(
        &mut self,
        reading: &SensorReading,
        breach: &ThresholdBreach,
        transition: AlertTransition,
    ) {
        self.metrics.record_breach();
        self.stats.record_breach(&breach.sensor_type);
        observability::metrics::record_threshold_breach(&breach.sensor_type, breach.severity);
        if transition != AlertTransition::Raised {
            debug!(
                sensor_type = %breach.sensor_type,
                device_id = %reading.device_id,
                value = breach.value,
                "threshold still breached"
            );
            return;
        }
        warn!(
            sensor_type = %breach.sensor_type,
            device_id = %reading.device_id,
            value = breach.value,
            bound = %breach.bound,
            severity = breach.severity.as_str(),
            message = breach.message.as_deref().unwrap_or(""),
            "threshold breached"
        );
    }

    /// Run until the raw channel is closed and drained.
    ///
    /// Dropping `tx` on return closes the dispatcher channel. Returns the
    /// per-sensor statistics collected along the way.
    #[instrument(name = "ingestion_pipeline", skip_all)]
    pub async fn run(
        mut self,
        rx: Receiver<RawMessage>,
        tx: Sender<SensorReading>,
    ) -> ReadingStatsAggregator {
        info!("ingestion pipeline started");

        while let Ok(message) = rx.recv().await {
            self.metrics.update_queue_len(rx.len());
            let Some(reading) = self.process(&message) else {
                continue;
            };
            if tx.send(reading).await.is_err() {
                warn!("dispatcher channel closed, stopping ingestion");
                break;
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            decoded = snapshot.readings_decoded,
            malformed = snapshot.malformed(),
            breaches = snapshot.threshold_breaches,
            "ingestion pipeline drained"
        );
        self.stats
    }
}
