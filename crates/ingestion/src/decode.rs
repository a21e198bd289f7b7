//! Topic and payload decoding
//!
//! Topics look like `iot/sensors/<sensor_type>[/<device_id>]`, payloads are
//! plain-text decimal numbers.

use std::collections::HashMap;

use contracts::{
    BridgeConfig, ContractError, DeviceId, RawMessage, SensorReading, MAX_DEVICE_ID_LEN,
    MAX_SENSOR_TYPE_LEN,
};

/// Minimum number of `/`-separated topic segments
pub const MIN_TOPIC_SEGMENTS: usize = 3;

/// Longest payload excerpt quoted in error messages
const PAYLOAD_EXCERPT_LEN: usize = 32;

/// Sensor type and optional device id extracted from a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicParts<'a> {
    pub sensor_type: &'a str,
    pub device_id: Option<&'a str>,
}

/// Split a topic into its sensor type and optional device segment.
///
/// # Errors
/// `MalformedTopic` when there are fewer than three segments, the sensor
/// type segment is blank, or a segment is longer than its store column.
pub fn parse_topic(topic: &str) -> Result<TopicParts<'_>, ContractError> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < MIN_TOPIC_SEGMENTS {
        return Err(ContractError::malformed_topic(
            topic,
            format!(
                "expected at least {MIN_TOPIC_SEGMENTS} segments, got {}",
                segments.len()
            ),
        ));
    }

    let sensor_type = segments[2].trim();
    if sensor_type.is_empty() {
        return Err(ContractError::malformed_topic(topic, "empty sensor type segment"));
    }
    check_segment_len(topic, "sensor type", sensor_type, MAX_SENSOR_TYPE_LEN)?;

    let device_id = segments
        .get(3)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());
    if let Some(device_id) = device_id {
        check_segment_len(topic, "device id", device_id, MAX_DEVICE_ID_LEN)?;
    }

    Ok(TopicParts {
        sensor_type,
        device_id,
    })
}

fn check_segment_len(
    topic: &str,
    what: &str,
    segment: &str,
    max: usize,
) -> Result<(), ContractError> {
    if segment.len() > max {
        return Err(ContractError::malformed_topic(
            topic,
            format!("{what} segment is {} bytes, limit is {max}", segment.len()),
        ));
    }
    Ok(())
}

/// Parse a payload as a finite decimal number.
///
/// # Errors
/// `MalformedPayload` for non UTF-8, empty, non-numeric or non-finite input.
pub fn parse_value(topic: &str, payload: &[u8]) -> Result<f64, ContractError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ContractError::malformed_payload(topic, format!("not UTF-8: {e}")))?;

    let text = text.trim();
    if text.is_empty() {
        return Err(ContractError::malformed_payload(topic, "empty payload"));
    }

    let value: f64 = text.parse().map_err(|_| {
        ContractError::malformed_payload(topic, format!("'{}' is not a number", excerpt(text)))
    })?;

    if !value.is_finite() {
        return Err(ContractError::malformed_payload(
            topic,
            format!("'{}' is not a finite number", excerpt(text)),
        ));
    }
    Ok(value)
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= PAYLOAD_EXCERPT_LEN {
        text.to_string()
    } else {
        let head: String = text.chars().take(PAYLOAD_EXCERPT_LEN).collect();
        format!("{head}...")
    }
}

/// Turns raw broker messages into readings.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    aliases: HashMap<String, String>,
    default_device: DeviceId,
    device_from_topic: bool,
}

impl MessageDecoder {
    pub fn new(default_device: impl Into<DeviceId>) -> Self {
        Self {
            aliases: HashMap::new(),
            default_device: default_device.into(),
            device_from_topic: true,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            aliases: config.ingestion.sensor_aliases.clone(),
            default_device: DeviceId::new(config.device.default_id.as_str()),
            device_from_topic: config.device.from_topic,
        }
    }

    /// Map topic segment `from` to canonical sensor type `to`
    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    pub fn with_device_from_topic(mut self, enabled: bool) -> Self {
        self.device_from_topic = enabled;
        self
    }

    /// Decode one message. The reading keeps the message's `received_at`.
    pub fn decode(&self, message: &RawMessage) -> Result<SensorReading, ContractError> {
        let parts = parse_topic(&message.topic)?;
        let value = parse_value(&message.topic, &message.payload)?;

        let sensor_type = self
            .aliases
            .get(parts.sensor_type)
            .map(String::as_str)
            .unwrap_or(parts.sensor_type);

        let device_id = match parts.device_id {
            Some(id) if self.device_from_topic => DeviceId::new(id),
            _ => self.default_device.clone(),
        };

        Ok(SensorReading::new(
            device_id,
            sensor_type,
            value,
            message.received_at,
        ))
    }
}
