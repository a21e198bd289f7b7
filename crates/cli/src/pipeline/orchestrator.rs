//! Bridge orchestrator - wires broker session, ingestion and dispatcher.
//!
//! Stages are connected by bounded channels:
//! broker session -> raw messages -> ingestion -> readings -> dispatcher.
//! Shutdown runs front to back so nothing already accepted is lost: the
//! session leaves the broker and drops its sender, ingestion drains and drops
//! its sender, the dispatcher awaits every in-flight write.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::{BridgeConfig, DeadLetterSink, ReadingStore};
use dispatcher::Dispatcher;
use ingestion::{BrokerSession, BrokerTransport, IngestionMetrics, IngestionPipeline, MqttTransport};
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

use super::BridgeStats;
use crate::error::CliError;

/// Production bridge: MQTT transport plus configured store and dead letter sink
pub struct Bridge {
    config: BridgeConfig,
    metrics_port: Option<u16>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, metrics_port: Option<u16>) -> Self {
        Self {
            config,
            metrics_port,
        }
    }

    /// Run until `shutdown` resolves, then drain.
    #[instrument(name = "bridge_run", skip_all)]
    pub async fn run<F>(self, shutdown: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()>,
    {
        if let Some(port) = self.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let transport = MqttTransport::from_config(&self.config.broker).map_err(|e| {
            CliError::broker_setup(self.config.broker.address.clone(), e.to_string())
        })?;
        info!(broker = %transport.address(), topic = %self.config.broker.topic, "Broker client ready");

        let dispatcher =
            Dispatcher::from_config(&self.config).context("Failed to create dispatcher")?;

        // An unreachable store is not fatal: writes retry and dead-letter.
        let store = dispatcher.store();
        match store.connect().await {
            Ok(()) => info!(store = %store.name(), "Store connected"),
            Err(e) => warn!(
                store = %store.name(),
                error = %e,
                "Store unreachable at startup, continuing"
            ),
        }
        drop(store);

        run_stages(&self.config, transport, dispatcher, shutdown).await
    }
}

/// Run all stages with the given transport and dispatcher until `shutdown`
/// resolves or the broker session ends on its own.
pub async fn run_stages<T, S, D, F>(
    config: &BridgeConfig,
    transport: T,
    dispatcher: Dispatcher<S, D>,
    shutdown: F,
) -> Result<BridgeStats>
where
    T: BrokerTransport + 'static,
    S: ReadingStore + Sync + 'static,
    D: DeadLetterSink + 'static,
    F: Future<Output = ()>,
{
    let start_time = Instant::now();

    let (raw_tx, raw_rx) = async_channel::bounded(config.ingestion.channel_capacity);
    let (reading_tx, reading_rx) = async_channel::bounded(config.dispatcher.queue_capacity);

    let ingestion_metrics = Arc::new(IngestionMetrics::new());
    let session = BrokerSession::new(
        transport,
        &config.broker,
        raw_tx,
        Arc::clone(&ingestion_metrics),
    );
    let state_rx = session.state();
    let pipeline = IngestionPipeline::from_config(config).with_metrics(Arc::clone(&ingestion_metrics));

    let dispatcher_handle = dispatcher.spawn(reading_rx);
    let ingestion_handle = tokio::spawn(pipeline.run(raw_rx, reading_tx));
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut session_handle = tokio::spawn(session.run(stop_rx));

    info!(
        channel_capacity = config.ingestion.channel_capacity,
        queue_capacity = config.dispatcher.queue_capacity,
        max_in_flight = config.dispatcher.max_in_flight,
        "Bridge running"
    );

    tokio::pin!(shutdown);
    let session_result = tokio::select! {
        _ = &mut shutdown => {
            info!("Shutting down bridge...");
            let _ = stop_tx.send(());
            (&mut session_handle).await
        }
        result = &mut session_handle => {
            warn!("Broker session ended without shutdown request");
            result
        }
    };

    let mut stage_error = None;
    match session_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "Broker session failed");
            stage_error = Some(CliError::stage("broker_session", e.to_string()));
        }
        Err(e) => {
            error!(error = %e, "Broker session task panicked");
            stage_error = Some(CliError::stage("broker_session", e.to_string()));
        }
    }

    let readings = ingestion_handle
        .await
        .map_err(|e| CliError::stage("ingestion", e.to_string()))?;
    let writer = dispatcher_handle
        .await
        .map_err(|e| CliError::stage("dispatcher", e.to_string()))?;

    let stats = BridgeStats {
        duration: start_time.elapsed(),
        final_state: *state_rx.borrow(),
        ingestion: ingestion_metrics.snapshot(),
        writer,
        readings: readings.summary(),
    };

    info!(
        duration_secs = stats.duration.as_secs_f64(),
        received = stats.ingestion.messages_received,
        persisted = stats.writer.persisted,
        dead_lettered = stats.writer.dead_lettered,
        "Bridge shutdown complete"
    );

    match stage_error {
        Some(e) => Err(e.into()),
        None => Ok(stats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BackoffConfig, ConnectionState};
    use dispatcher::{MemoryDeadLetter, MemoryStore};
    use ingestion::ScriptedTransport;
    use std::time::Duration;

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.broker.reconnect = BackoffConfig::new(1, 5, None);
        config.store.retry = BackoffConfig::new(1, 5, Some(3));
        config.dispatcher.max_in_flight = 2;
        config
    }

    #[tokio::test]
    async fn test_stages_drain_on_shutdown() {
        let config = test_config();
        let (transport, script) = ScriptedTransport::new();
        let store = MemoryStore::new("memory");
        let dead = MemoryDeadLetter::new("dlq");
        let dispatcher = Dispatcher::new(
            store.clone(),
            dead.clone(),
            &config.dispatcher,
            config.store.retry.clone(),
        );

        script.connect();
        script.publish("iot/sensors/temperature", "23.5");
        script.publish("iot/sensors/humidity", "61");
        script.publish("iot/sensors", "1");

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let store_probe = store.clone();
        let stopper = tokio::spawn(async move {
            while store_probe.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _ = stop_tx.send(());
        });

        let stats = run_stages(&config, transport, dispatcher, async {
            let _ = stop_rx.await;
        })
        .await
        .unwrap();
        stopper.await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(stats.writer.persisted, 2);
        assert_eq!(stats.ingestion.malformed_topics, 1);
        assert_eq!(stats.final_state, ConnectionState::Disconnected);
        assert!(script.disconnected());
        assert!(dead.is_closed());
        assert!(store.is_closed());
    }
}
