//! Impure I/O operations for MQTT client
//!
//! This module handles network communication, async coordination and the
//! integration with the rumqttc client. Connection state lives in a `watch`
//! channel: the event-loop task writes it, everyone else reads snapshots.
//!
//! The event-loop task never reconnects on its own. When the connection ends
//! it records the reason and exits; the poll loop decides when to call
//! [`MqttClient::reconnect`].

use super::connection::{configure_mqtt_options, DisconnectReason, MqttError, SessionState};
use super::health_monitor::{ConnectionEvent, HealthMonitor};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for DISCONNECT to be written
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT transport client for the aircon bridge
pub struct MqttClient {
    config: MqttSection,
    client: Arc<Mutex<AsyncClient>>,
    pending_event_loop: Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    forwarder: MessageForwarder,
}

impl MqttClient {
    /// Build a client; no network I/O happens until [`Transport::connect`]
    ///
    /// Inbound publishes are forwarded to `inbound` without blocking.
    pub fn new(
        config: &MqttSection,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(config)?;
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(MqttClient {
            config: config.clone(),
            client: Arc::new(Mutex::new(client)),
            pending_event_loop: Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            state_tx,
            state_rx,
            shutdown_tx,
            forwarder: MessageForwarder::new(inbound),
        })
    }

    /// Helper method to create new MQTT connection and event loop
    /// Used for initial connection and reconnection attempts
    fn create_connection(config: &MqttSection) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(config)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    ///
    /// The receiver must be subscribed before the event-loop task is spawned
    /// so the first state change cannot be missed.
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<SessionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                let state = *state_rx.borrow_and_update();
                if state.connected {
                    return Ok(());
                }
                if state.reconnect_pending {
                    return Err(MqttError::ConnectionFailedStr(
                        "Connection closed before ConnAck".to_string(),
                    ));
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnAckTimeout(timeout)),
        }
    }

    /// Shared body of connect and reconnect
    ///
    /// Starts a fresh event-loop task and blocks until ConnAck, an error, or
    /// the connect timeout. Any previous task is aborted first.
    async fn establish(&self) -> Result<(), MqttError> {
        let event_loop = match self.pending_event_loop.lock().await.take() {
            Some(event_loop) => event_loop,
            None => {
                let (new_client, new_event_loop) = Self::create_connection(&self.config)?;
                *self.client.lock().await = new_client;
                debug!(target: "mqtt_transport", "Created new connection");
                new_event_loop
            }
        };

        if let Some(previous) = self.event_loop_handle.lock().await.take() {
            previous.abort();
        }

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let state_rx = self.state_tx.subscribe();

        let span = crate::mqtt_span!(broker = %self.config.broker_url, client_id = %self.config.client_id);
        let handle = tokio::spawn(
            Self::run_event_loop(
                event_loop,
                self.state_tx.clone(),
                shutdown_rx,
                self.forwarder.clone(),
            )
            .instrument(span),
        );
        *self.event_loop_handle.lock().await = Some(handle);

        match Self::wait_for_connection_confirmation(state_rx, self.connect_timeout()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(handle) = self.event_loop_handle.lock().await.take() {
                    handle.abort();
                }
                let event = ConnectionEvent::ConnectFailed(e.to_string());
                self.state_tx
                    .send_modify(|state| *state = HealthMonitor::determine_next_state(*state, &event));
                Err(e)
            }
        }
    }

    /// Event-loop task: drives rumqttc until the connection ends
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<SessionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        forwarder: MessageForwarder,
    ) {
        info!("Starting MQTT event loop");

        loop {
            let event_result = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                    continue;
                }
                event_result = event_loop.poll() => event_result,
            };

            let event = match event_result {
                Ok(event) => event,
                Err(e) => {
                    let reason = if *shutdown_rx.borrow() {
                        DisconnectReason::NORMAL
                    } else {
                        error!("MQTT event loop error: {}", e);
                        DisconnectReason::Network(e.to_string())
                    };
                    Self::apply_event(&state_tx, ConnectionEvent::Disconnected(reason));
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    Self::apply_event(&state_tx, ConnectionEvent::ConnAckReceived);
                }
                EventRoute::MessageReceived(message) => {
                    debug!(target: "mqtt_transport", topic = %message.topic, "Received MQTT message");
                    forwarder.forward(message);
                }
                EventRoute::Disconnected(reason) => {
                    Self::apply_event(&state_tx, ConnectionEvent::Disconnected(reason));
                    break;
                }
                EventRoute::DisconnectSent => {
                    debug!(target: "mqtt_transport", "DISCONNECT sent to broker");
                    Self::apply_event(
                        &state_tx,
                        ConnectionEvent::Disconnected(DisconnectReason::NORMAL),
                    );
                    break;
                }
                EventRoute::SubscriptionConfirmed {
                    packet_id,
                    reason_codes,
                } => {
                    debug!(target: "mqtt_transport", packet_id, "Subscription confirmed: {}", reason_codes);
                }
                EventRoute::InfrastructureEvent(event_str) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                }
                EventRoute::OutgoingEvent => {}
            }
        }

        info!("MQTT event loop stopped");
    }

    fn apply_event(state_tx: &watch::Sender<SessionState>, event: ConnectionEvent) {
        state_tx.send_modify(|state| *state = HealthMonitor::determine_next_state(*state, &event));
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = *self.state_rx.borrow();
        if !state.connected {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self) -> Result<(), MqttError> {
        info!(broker = %self.config.broker_url, client_id = %self.config.client_id, "Connecting to MQTT broker");
        self.establish().await
    }

    async fn reconnect(&self) -> Result<(), MqttError> {
        info!(broker = %self.config.broker_url, "Reconnecting to MQTT broker");
        self.establish().await
    }

    /// Graceful shutdown: queue DISCONNECT and let the event loop write it
    ///
    /// The event-loop task exits once rumqttc reports the packet as sent. The
    /// shutdown signal and an abort are only used when that takes longer than
    /// [`SHUTDOWN_GRACE`] or there is no live connection to flush.
    async fn disconnect(&self) -> Result<(), MqttError> {
        let connected = self.state_rx.borrow().connected;
        let result = if connected {
            let client = self.client.lock().await;
            client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))
        } else {
            Ok(())
        };

        if result.is_err() || !connected {
            self.shutdown_tx.send_replace(true);
        }

        if let Some(mut handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    self.shutdown_tx.send_replace(true);
                    handle.abort();
                }
            }
        }

        Self::apply_event(
            &self.state_tx,
            ConnectionEvent::Disconnected(DisconnectReason::NORMAL),
        );
        info!("MQTT client disconnected");
        result
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let qos = MessageHandler::determine_qos_level(retain);
        let client = self.client.lock().await;
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", topic = %topic, retain, "Published message");
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;

        info!(filter = %filter, "Subscribing to command topics");
        let client = self.client.lock().await;
        client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    fn session_state(&self) -> SessionState {
        *self.state_rx.borrow()
    }
}
