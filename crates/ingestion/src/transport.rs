//! Broker transport abstraction
//!
//! `BrokerTransport` is the seam between the session state machine and the
//! wire client. `MqttTransport` drives a `rumqttc` event loop; tests use
//! `ScriptedTransport`.

use std::time::Duration;

use contracts::{BrokerAddress, BrokerConfig, ContractError, RawMessage};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tracing::{debug, trace};
use uuid::Uuid;

/// Capacity of the rumqttc request queue
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound on how long a clean disconnect may take
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Events surfaced to the session
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Connection acknowledged by the broker
    Connected,
    /// Subscription acknowledged
    Subscribed,
    /// Broker refused the subscription; the connection stays up
    SubscribeRejected,
    /// Inbound publish
    Message(RawMessage),
    /// Protocol traffic the session does not care about (pings, acks)
    Idle,
}

/// Broker client seen by `BrokerSession`.
///
/// `poll` drives the connection; after it returns an error the next call
/// must attempt to reconnect. A failed `subscribe` leaves the connection
/// up and may be retried.
#[trait_variant::make(BrokerTransport: Send)]
pub trait LocalBrokerTransport {
    /// Wait for the next event
    async fn poll(&mut self) -> Result<BrokerEvent, ContractError>;

    /// Request a subscription; acknowledged later by `BrokerEvent::Subscribed`
    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), ContractError>;

    /// Leave the broker cleanly
    async fn disconnect(&mut self) -> Result<(), ContractError>;
}

/// MQTT transport backed by `rumqttc`
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    address: BrokerAddress,
}

impl MqttTransport {
    /// Build the client from configuration. No I/O happens until `poll`.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ContractError> {
        let address = BrokerAddress::parse(&config.address)?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("park-iot-bridge-{}", Uuid::new_v4()));

        let options = mqtt_options(config, &address, client_id);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        debug!(broker = %address, "mqtt transport created");

        Ok(Self {
            client,
            eventloop,
            address,
        })
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }
}

/// Clean session with automatic acks: a QoS 1 publish is acknowledged when
/// polled, before it is stored, so delivery is at most once across a crash.
fn mqtt_options(config: &BrokerConfig, address: &BrokerAddress, client_id: String) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, address.host.clone(), address.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    options.set_manual_acks(false);
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }
    options
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

impl BrokerTransport for MqttTransport {
    async fn poll(&mut self) -> Result<BrokerEvent, ContractError> {
        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| ContractError::broker_transport(format!("{}: {e}", self.address)))?;

        match event {
            Event::Incoming(Packet::ConnAck(_)) => Ok(BrokerEvent::Connected),
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Ok(BrokerEvent::SubscribeRejected);
                }
                Ok(BrokerEvent::Subscribed)
            }
            Event::Incoming(Packet::Publish(publish)) => Ok(BrokerEvent::Message(
                RawMessage::new(publish.topic, publish.payload),
            )),
            Event::Incoming(Packet::Disconnect) => {
                Err(ContractError::broker_transport("broker closed the session"))
            }
            other => {
                trace!(event = ?other, "mqtt event");
                Ok(BrokerEvent::Idle)
            }
        }
    }

    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), ContractError> {
        // The event loop is not being polled while we are here, so a blocking
        // subscribe could wait on a full request queue forever.
        self.client
            .try_subscribe(topic, qos_from_level(qos))
            .map_err(|e| ContractError::broker_transport(format!("subscribe {topic}: {e}")))
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        self.client
            .try_disconnect()
            .map_err(|e| ContractError::broker_transport(format!("disconnect: {e}")))?;

        // Flush the DISCONNECT packet through the event loop.
        let eventloop = &mut self.eventloop;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
            debug!(broker = %self.address, "disconnect flush timed out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_from_config_parses_address() {
        let config = BrokerConfig {
            address: "mqtt://172.20.10.4:1884".to_string(),
            username: Some("zasha".to_string()),
            password: Some("mypassword".to_string()),
            ..Default::default()
        };
        let transport = MqttTransport::from_config(&config).unwrap();
        assert_eq!(transport.address().port, 1884);
    }

    #[test]
    fn test_options_use_clean_session_and_auto_acks() {
        let config = BrokerConfig {
            keep_alive_secs: 15,
            ..Default::default()
        };
        let address = BrokerAddress::parse(&config.address).unwrap();
        let options = mqtt_options(&config, &address, "park-iot-bridge-test".to_string());
        assert!(options.clean_session());
        assert!(!options.manual_acks());
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(options.client_id(), "park-iot-bridge-test");
    }

    #[test]
    fn test_from_config_rejects_bad_address() {
        let config = BrokerConfig {
            address: "ws://broker".to_string(),
            ..Default::default()
        };
        assert!(MqttTransport::from_config(&config).is_err());
    }
}
