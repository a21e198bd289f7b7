//! # Ingestion Pipeline
//!
//! Broker-side half of the bridge.
//!
//! Responsibilities:
//! - Keep an MQTT subscription alive (`BrokerSession` state machine with
//!   uncapped reconnect backoff)
//! - Decode `iot/sensors/<sensor_type>[/<device_id>]` messages into
//!   `SensorReading`s, dropping malformed ones
//! - Evaluate alert thresholds
//! - Send to downstream via bounded async-channel (backpressure, no drops)
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{BrokerSession, IngestionPipeline, MqttTransport};
//!
//! let (raw_tx, raw_rx) = async_channel::bounded(config.ingestion.channel_capacity);
//! let (reading_tx, reading_rx) = async_channel::bounded(config.dispatcher.queue_capacity);
//!
//! let pipeline = IngestionPipeline::from_config(&config);
//! let transport = MqttTransport::from_config(&config.broker)?;
//! let session = BrokerSession::new(transport, &config.broker, raw_tx, pipeline.metrics());
//!
//! tokio::spawn(session.run(shutdown_rx));
//! tokio::spawn(pipeline.run(raw_rx, reading_tx));
//! // reading_rx feeds the dispatcher
//! ```
//!
//! ## Scripted Testing
//!
//! ```ignore
//! use ingestion::ScriptedTransport;
//!
//! let (transport, script) = ScriptedTransport::new();
//! script.connect();
//! script.publish("iot/sensors/temperature", "23.5");
//! ```

mod config;
mod decode;
mod error;
mod mock;
mod pipeline;
mod session;
mod thresholds;
mod transport;

// Re-exports
pub use config::{IngestionMetrics, MetricsSnapshot};
pub use decode::{parse_topic, parse_value, MessageDecoder, TopicParts, MIN_TOPIC_SEGMENTS};
pub use error::{IngestionError, Result};
pub use mock::{ScriptController, ScriptStep, ScriptedTransport};
pub use pipeline::IngestionPipeline;
pub use session::BrokerSession;
pub use thresholds::{
    AlertTracker, AlertTransition, BreachBound, ThresholdBreach, ThresholdEvaluator,
};
pub use transport::{BrokerEvent, BrokerTransport, LocalBrokerTransport, MqttTransport};
