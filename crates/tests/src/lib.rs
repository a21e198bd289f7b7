//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置加载 + 环境变量覆盖
//! - 模拟 e2e 测试（无需 broker / MySQL）：
//!   ScriptedTransport -> BrokerSession -> IngestionPipeline -> Dispatcher -> MemoryStore

#[cfg(test)]
mod config_tests {
    use config_loader::{apply_overrides, ConfigFormat, ConfigLoader};

    const FILE: &str = r#"
[broker]
address = "mqtt://broker.park.local:1883"
topic = "iot/sensors/#"

[store]
kind = "log"

[[thresholds]]
sensor_type = "temperature"
min = -10.0
max = 45.0
severity = "high"
"#;

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = ConfigLoader::load_from_str(FILE, ConfigFormat::Toml).unwrap();
        let applied = apply_overrides(&mut config, |key| match key {
            "PARK_IOT_BROKER_ADDRESS" => Some("tcp://10.0.0.2:1884".to_string()),
            "PARK_IOT_DEVICE_ID" => Some("esp32_gate".to_string()),
            _ => None,
        });

        assert_eq!(applied.len(), 2);
        assert_eq!(config.broker.address, "tcp://10.0.0.2:1884");
        assert_eq!(config.device.default_id, "esp32_gate");
        assert_eq!(config.thresholds.len(), 1);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_inverted_threshold() {
        let content = FILE.replace("min = -10.0", "min = 50.0");
        let err = ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("thresholds[0]"));
    }

    #[test]
    fn test_rejects_bad_broker_address() {
        let content = FILE.replace("mqtt://broker.park.local:1883", "http://broker.park.local");
        assert!(ConfigLoader::load_from_str(&content, ConfigFormat::Toml).is_err());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;

    use async_channel::bounded;
    use contracts::{
        BackoffConfig, BridgeConfig, ConnectionState, Severity, ThresholdConfig,
    };
    use dispatcher::{Dispatcher, MemoryDeadLetter, MemoryStore};
    use ingestion::{
        BrokerSession, IngestionMetrics, IngestionPipeline, ScriptController, ScriptedTransport,
    };
    use observability::ReadingStatsAggregator;
    use tokio::sync::{oneshot, watch};
    use tokio::task::JoinHandle;

    /// Whole bridge wired to a scripted broker and in-memory persistence
    struct Harness {
        script: ScriptController,
        store: MemoryStore,
        dead: MemoryDeadLetter,
        state: watch::Receiver<ConnectionState>,
        metrics: Arc<IngestionMetrics>,
        stop: oneshot::Sender<()>,
        session: JoinHandle<ingestion::Result<()>>,
        ingestion: JoinHandle<ReadingStatsAggregator>,
        dispatcher: JoinHandle<dispatcher::MetricsSnapshot>,
    }

    struct Finished {
        ingestion: ingestion::MetricsSnapshot,
        writer: dispatcher::MetricsSnapshot,
        stats: ReadingStatsAggregator,
    }

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.broker.reconnect = BackoffConfig::new(5, 20, None);
        config.store.retry = BackoffConfig::new(1, 5, Some(3));
        config.dispatcher.max_in_flight = 4;
        config
    }

    fn start(config: &BridgeConfig) -> Harness {
        let (transport, script) = ScriptedTransport::new();
        let store = MemoryStore::new("memory");
        let dead = MemoryDeadLetter::new("dlq");

        let (raw_tx, raw_rx) = bounded(config.ingestion.channel_capacity);
        let (reading_tx, reading_rx) = bounded(config.dispatcher.queue_capacity);
        let metrics = Arc::new(IngestionMetrics::new());

        let session = BrokerSession::new(transport, &config.broker, raw_tx, metrics.clone());
        let state = session.state();
        let pipeline = IngestionPipeline::from_config(config).with_metrics(metrics.clone());
        let writer = Dispatcher::new(
            store.clone(),
            dead.clone(),
            &config.dispatcher,
            config.store.retry.clone(),
        );

        let (stop, stop_rx) = oneshot::channel();
        Harness {
            script,
            store,
            dead,
            state,
            metrics,
            stop,
            session: tokio::spawn(session.run(stop_rx)),
            ingestion: tokio::spawn(pipeline.run(raw_rx, reading_tx)),
            dispatcher: writer.spawn(reading_rx),
        }
    }

    impl Harness {
        async fn wait_state(&mut self, target: ConnectionState) {
            tokio::time::timeout(Duration::from_secs(2), self.state.wait_for(|s| *s == target))
                .await
                .expect("state not reached")
                .expect("session gone");
        }

        /// Let the bridge go idle, then shut down front to back
        async fn finish(self) -> Finished {
            let _ = self.stop.send(());
            self.session.await.unwrap().unwrap();
            let stats = self.ingestion.await.unwrap();
            let writer = self.dispatcher.await.unwrap();
            Finished {
                ingestion: self.metrics.snapshot(),
                writer,
                stats,
            }
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn test_single_reading_becomes_one_row() {
        let mut bridge = start(&config());
        bridge.script.connect();
        bridge.wait_state(ConnectionState::Subscribed).await;
        bridge.script.publish("iot/sensors/temperature", "23.5");
        bridge.wait_state(ConnectionState::Receiving).await;

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { !store.is_empty() }
        })
        .await;

        let done = bridge.finish().await;
        let rows = store.readings();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sensor_type, "temperature");
        assert_eq!(rows[0].value, 23.5);
        assert_eq!(rows[0].device_id.as_str(), "esp32_1");
        assert_eq!(done.writer.persisted, 1);
        assert_eq!(done.stats.summary().total_readings, 1);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_not_stored() {
        let bridge = start(&config());
        bridge.script.connect();
        bridge.script.publish("iot/sensors", "12");
        bridge.script.publish("iot", "12");
        bridge.script.publish("iot/sensors/temperature", "abc");
        bridge.script.publish("iot/sensors/temperature", "");
        bridge.script.publish("iot/sensors/temperature", "NaN");
        bridge.script.publish("iot/sensors/light", "310");

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.len() == 1 }
        })
        .await;

        let done = bridge.finish().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.readings()[0].sensor_type, "light");
        assert_eq!(done.ingestion.malformed_topics, 2);
        assert_eq!(done.ingestion.malformed_payloads, 3);
        assert_eq!(done.ingestion.messages_received, 6);
        assert_eq!(done.writer.received, 1);
    }

    #[tokio::test]
    async fn test_distinct_sensor_types_become_distinct_rows() {
        let bridge = start(&config());
        let types = ["temperature", "humidity", "light", "motion", "noise"];
        bridge.script.connect();
        for (i, sensor_type) in types.iter().enumerate() {
            bridge
                .script
                .publish(format!("iot/sensors/{sensor_type}"), format!("{}", i * 10));
        }

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.len() == types.len() }
        })
        .await;

        let done = bridge.finish().await;
        let mut stored: Vec<String> = store.readings().into_iter().map(|r| r.sensor_type).collect();
        stored.sort();
        let mut expected: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        expected.sort();
        assert_eq!(stored, expected);
        assert_eq!(done.stats.summary().sensors.len(), types.len());
    }

    #[tokio::test]
    async fn test_device_id_from_topic() {
        let bridge = start(&config());
        bridge.script.connect();
        bridge.script.publish("iot/sensors/humidity/esp32_gate", "55");

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.len() == 1 }
        })
        .await;
        bridge.finish().await;

        assert_eq!(store.readings()[0].device_id.as_str(), "esp32_gate");
    }

    #[tokio::test]
    async fn test_store_outage_within_cap_persists_once() {
        let bridge = start(&config());
        bridge.store.fail_next(2);
        bridge.script.connect();
        bridge.script.publish("iot/sensors/temperature", "19.0");

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.len() == 1 }
        })
        .await;

        let done = bridge.finish().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.attempts(), 3);
        assert_eq!(done.writer.retries, 2);
        assert_eq!(done.writer.dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_store_outage_beyond_cap_dead_letters() {
        let bridge = start(&config());
        bridge.store.fail_next(10);
        bridge.script.connect();
        bridge.script.publish("iot/sensors/noise", "71.5");

        let dead = bridge.dead.clone();
        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.attempts() >= 3 }
        })
        .await;

        let done = bridge.finish().await;
        assert!(store.is_empty());
        assert_eq!(store.attempts(), 3);
        assert_eq!(done.writer.dead_lettered, 1);

        let letters = dead.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reading.sensor_type, "noise");
        assert_eq!(letters[0].reading.value, 71.5);
        assert_eq!(letters[0].attempts, 3);
        assert!(dead.is_closed());
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_and_keeps_delivering() {
        let mut bridge = start(&config());
        bridge.script.connect();
        bridge.script.publish("iot/sensors/temperature", "21.0");
        bridge.wait_state(ConnectionState::Receiving).await;

        // Scripted steps replay in order: failure, backoff, then a new ConnAck.
        bridge.script.fail("connection reset by peer");
        bridge.script.connect();
        for value in ["21.5", "22.0", "22.5"] {
            bridge.script.publish("iot/sensors/temperature", value);
        }

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.len() == 4 }
        })
        .await;

        let script = bridge.script.clone();
        let done = bridge.finish().await;
        assert_eq!(script.subscriptions(), vec!["iot/sensors/#", "iot/sensors/#"]);
        assert!(script.disconnected());
        assert_eq!(done.ingestion.reconnects, 1);
        assert_eq!(done.writer.persisted, 4);
    }

    #[tokio::test]
    async fn test_threshold_breach_is_counted_and_still_stored() {
        let mut config = config();
        config.thresholds.push(ThresholdConfig {
            sensor_type: "temperature".to_string(),
            min: Some(-10.0),
            max: Some(40.0),
            severity: Severity::High,
            message: Some("too hot".to_string()),
            enabled: true,
        });

        let bridge = start(&config);
        bridge.script.connect();
        bridge.script.publish("iot/sensors/temperature", "45.2");
        bridge.script.publish("iot/sensors/temperature", "40");
        bridge.script.publish("iot/sensors/temperature", "-12");

        let store = bridge.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.len() == 3 }
        })
        .await;

        let done = bridge.finish().await;
        assert_eq!(done.ingestion.threshold_breaches, 2);
        assert_eq!(done.stats.summary().total_breaches, 2);
    }

    #[tokio::test]
    async fn test_backpressure_bounds_concurrent_writes() {
        let mut config = config();
        config.dispatcher.max_in_flight = 2;
        config.dispatcher.queue_capacity = 1;
        config.ingestion.channel_capacity = 1;

        let (transport, script) = ScriptedTransport::new();
        let store = MemoryStore::new("memory").with_delay(Duration::from_millis(5));
        let (raw_tx, raw_rx) = bounded(config.ingestion.channel_capacity);
        let (reading_tx, reading_rx) = bounded(config.dispatcher.queue_capacity);
        let metrics = Arc::new(IngestionMetrics::new());

        let session = BrokerSession::new(transport, &config.broker, raw_tx, metrics.clone());
        let pipeline = IngestionPipeline::from_config(&config).with_metrics(metrics.clone());
        let writer = Dispatcher::new(
            store.clone(),
            MemoryDeadLetter::new("dlq"),
            &config.dispatcher,
            config.store.retry.clone(),
        );

        let (stop, stop_rx) = oneshot::channel();
        let session = tokio::spawn(session.run(stop_rx));
        let ingestion = tokio::spawn(pipeline.run(raw_rx, reading_tx));
        let dispatcher = writer.spawn(reading_rx);

        script.connect();
        for i in 0..20 {
            script.publish("iot/sensors/light", format!("{i}"));
        }

        let watched = store.clone();
        eventually(|| {
            let watched = watched.clone();
            async move { watched.len() == 20 }
        })
        .await;

        let _ = stop.send(());
        session.await.unwrap().unwrap();
        ingestion.await.unwrap();
        let snap = dispatcher.await.unwrap();

        assert_eq!(snap.persisted, 20);
        assert!(store.peak_in_flight() <= 2);
        assert!(snap.peak_in_flight <= 2);
    }
}
