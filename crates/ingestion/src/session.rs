//! Broker session state machine
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Receiving
//!        any state --(transport failure)--> ErrorBackoff -> Connecting
//!        Connecting --(subscribe refused)--> ErrorBackoff -> Connecting
//! ```
//!
//! The subscription is requested on every connection acknowledgement, so a
//! clean-session reconnect needs no outside help. A refused subscription on
//! a live connection is requested again after the backoff. Reconnect
//! attempts are never capped; the failure counter resets on each
//! acknowledgement.

use std::sync::Arc;

use async_channel::Sender;
use contracts::{BackoffConfig, BrokerConfig, ConnectionState, ContractError, RawMessage};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::error::{IngestionError, Result};
use crate::transport::{BrokerEvent, BrokerTransport};

/// Owns the transport for the lifetime of the bridge and feeds raw
/// messages into the ingestion channel.
pub struct BrokerSession<T> {
    transport: T,
    topic: String,
    qos: u8,
    reconnect: BackoffConfig,
    tx: Sender<RawMessage>,
    metrics: Arc<IngestionMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    failures: u32,
    /// Connected, but no subscription request has been accepted yet
    needs_subscribe: bool,
}

impl<T: BrokerTransport> BrokerSession<T> {
    pub fn new(
        transport: T,
        config: &BrokerConfig,
        tx: Sender<RawMessage>,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            topic: config.topic.clone(),
            qos: config.qos,
            reconnect: config.reconnect.clone(),
            tx,
            metrics,
            state_tx,
            failures: 0,
            needs_subscribe: false,
        }
    }

    /// Observe state transitions
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "broker state changed");
            observability::metrics::record_broker_state(next);
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Run until `shutdown` fires or the ingestion channel closes.
    ///
    /// Transport failures never end the loop. The transport is disconnected
    /// and the state returns to `Disconnected` on every exit path.
    #[instrument(name = "broker_session", skip_all, fields(topic = %self.topic))]
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        info!("broker session starting");
        self.set_state(ConnectionState::Connecting);

        let outcome = loop {
            if self.needs_subscribe {
                if let Err(e) = self.request_subscription().await {
                    if self.backoff(&e, &mut shutdown).await {
                        info!("shutdown requested during backoff");
                        break Ok(());
                    }
                    continue;
                }
            }

            let event = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, leaving broker");
                    break Ok(());
                }
                event = self.transport.poll() => event,
            };

            let result = match event {
                Ok(event) => self.handle_event(event).await,
                Err(e) => {
                    // The next CONNACK requests the subscription.
                    self.needs_subscribe = false;
                    Err(e)
                }
            };

            match result {
                Ok(true) => {}
                Ok(false) => break Err(IngestionError::channel_closed("raw message")),
                Err(e) => {
                    if self.backoff(&e, &mut shutdown).await {
                        info!("shutdown requested during backoff");
                        break Ok(());
                    }
                }
            }
        };

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
        }
        self.set_state(ConnectionState::Disconnected);
        info!("broker session stopped");
        outcome
    }

    /// Returns `Ok(false)` when the downstream channel is gone.
    async fn handle_event(&mut self, event: BrokerEvent) -> std::result::Result<bool, ContractError> {
        match event {
            BrokerEvent::Connected => {
                if self.failures > 0 {
                    info!(after_failures = self.failures, "broker reconnected");
                } else {
                    info!("broker connected");
                }
                self.failures = 0;
                self.needs_subscribe = true;
            }
            BrokerEvent::Subscribed => {
                info!("subscription acknowledged");
                self.failures = 0;
                self.set_state(ConnectionState::Subscribed);
            }
            BrokerEvent::SubscribeRejected => {
                self.needs_subscribe = true;
                return Err(ContractError::broker_transport(format!(
                    "subscription to {} rejected by broker",
                    self.topic
                )));
            }
            BrokerEvent::Message(message) => {
                if self.current_state() == ConnectionState::Subscribed {
                    self.set_state(ConnectionState::Receiving);
                }
                self.metrics.record_received();
                observability::metrics::record_message_received();
                // Awaiting here is the backpressure path: a full channel
                // stalls the event loop instead of dropping messages.
                if self.tx.send(message).await.is_err() {
                    warn!("ingestion channel closed, stopping session");
                    return Ok(false);
                }
            }
            BrokerEvent::Idle => {}
        }
        Ok(true)
    }

    async fn request_subscription(&mut self) -> std::result::Result<(), ContractError> {
        self.transport.subscribe(&self.topic, self.qos).await?;
        self.needs_subscribe = false;
        debug!(qos = self.qos, "subscription requested");
        Ok(())
    }

    /// Sleep for the next reconnect delay. Returns true if shutdown fired.
    async fn backoff(&mut self, error: &ContractError, shutdown: &mut oneshot::Receiver<()>) -> bool {
        self.failures = self.failures.saturating_add(1);
        let delay = self.reconnect.delay_for(self.failures);
        self.set_state(ConnectionState::ErrorBackoff);
        self.metrics.record_reconnect();
        observability::metrics::record_broker_reconnect();
        warn!(
            error = %error,
            attempt = self.failures,
            delay_ms = delay.as_millis() as u64,
            "broker failure, backing off"
        );

        tokio::select! {
            _ = shutdown => true,
            _ = tokio::time::sleep(delay) => {
                self.set_state(ConnectionState::Connecting);
                false
            }
        }
    }
}
