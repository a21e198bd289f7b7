//! Scripted broker transport
//!
//! Stands in for a real broker in tests: the test pushes connection
//! acknowledgements, publishes and failures through a `ScriptController`,
//! and the transport replays them in order. Once the script is empty the
//! transport waits, like an idle broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use contracts::{ContractError, RawMessage};
use tokio::sync::mpsc;
use tracing::trace;

use crate::transport::{BrokerEvent, BrokerTransport};

/// One scripted broker event
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Connection acknowledged
    Connect,
    /// Inbound message
    Publish { topic: String, payload: Bytes },
    /// Transport failure with the given reason
    Fail(String),
    /// Subscription refused by the broker
    DenySubscription,
}

#[derive(Debug, Default)]
struct ScriptState {
    subscriptions: Mutex<Vec<String>>,
    disconnected: AtomicBool,
    reject_subscribe: AtomicBool,
}

/// Test-side handle of a `ScriptedTransport`
#[derive(Debug, Clone)]
pub struct ScriptController {
    steps: mpsc::UnboundedSender<ScriptStep>,
    state: Arc<ScriptState>,
}

impl ScriptController {
    pub fn push(&self, step: ScriptStep) {
        // A dropped transport just means the session already ended.
        let _ = self.steps.send(step);
    }

    pub fn connect(&self) {
        self.push(ScriptStep::Connect);
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Bytes>) {
        self.push(ScriptStep::Publish {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.push(ScriptStep::Fail(reason.into()));
    }

    /// Refuse the pending subscription, as a failing SUBACK would
    pub fn deny_subscription(&self) {
        self.push(ScriptStep::DenySubscription);
    }

    /// Make subsequent subscribe requests fail
    pub fn reject_subscribe(&self, reject: bool) {
        self.state.reject_subscribe.store(reject, Ordering::SeqCst);
    }

    /// Topics subscribed so far, one entry per request
    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    pub fn disconnected(&self) -> bool {
        self.state.disconnected.load(Ordering::SeqCst)
    }
}

/// Broker transport that replays a script
pub struct ScriptedTransport {
    steps: mpsc::UnboundedReceiver<ScriptStep>,
    pending: VecDeque<BrokerEvent>,
    state: Arc<ScriptState>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ScriptState::default());
        let transport = Self {
            steps: rx,
            pending: VecDeque::new(),
            state: state.clone(),
        };
        (transport, ScriptController { steps: tx, state })
    }
}

impl BrokerTransport for ScriptedTransport {
    async fn poll(&mut self) -> Result<BrokerEvent, ContractError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }

        match self.steps.recv().await {
            Some(ScriptStep::Connect) => Ok(BrokerEvent::Connected),
            Some(ScriptStep::Publish { topic, payload }) => {
                trace!(topic = %topic, "scripted publish");
                Ok(BrokerEvent::Message(RawMessage::new(topic, payload)))
            }
            Some(ScriptStep::Fail(reason)) => Err(ContractError::broker_transport(reason)),
            Some(ScriptStep::DenySubscription) => Ok(BrokerEvent::SubscribeRejected),
            None => std::future::pending().await,
        }
    }

    async fn subscribe(&mut self, topic: &str, _qos: u8) -> Result<(), ContractError> {
        if self.state.reject_subscribe.load(Ordering::SeqCst) {
            return Err(ContractError::broker_transport(format!(
                "subscribe {topic}: request queue full"
            )));
        }
        if let Ok(mut subs) = self.state.subscriptions.lock() {
            subs.push(topic.to_string());
        }
        self.pending.push_back(BrokerEvent::Subscribed);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        self.state.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let (mut transport, script) = ScriptedTransport::new();
        script.connect();
        script.publish("iot/sensors/light", "120");
        script.fail("reset");

        assert!(matches!(transport.poll().await, Ok(BrokerEvent::Connected)));
        transport.subscribe("iot/sensors/#", 1).await.unwrap();
        assert!(matches!(transport.poll().await, Ok(BrokerEvent::Subscribed)));
        match transport.poll().await {
            Ok(BrokerEvent::Message(msg)) => assert_eq!(&msg.payload[..], b"120"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(transport.poll().await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_subscribe() {
        let (mut transport, script) = ScriptedTransport::new();
        script.reject_subscribe(true);
        assert!(transport.subscribe("iot/sensors/#", 1).await.is_err());
        assert!(script.subscriptions().is_empty());
    }
}
