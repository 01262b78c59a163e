//! Transport layer for broker communication
//!
//! This module provides the transport abstraction used by the broker session
//! and the MQTT implementation behind it.

use bytes::Bytes;

pub mod mqtt;

pub use mqtt::connection::SessionState;

/// Message received on a subscribed topic, handed to the command dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the MQTT client so the session,
/// poll loop and dispatcher can be driven by a mock in tests. All operations
/// take `&self`; implementations keep their connection state internally.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait for ConnAck
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Replace the current connection with a fresh one
    async fn reconnect(&self) -> Result<(), Self::Error>;

    /// Disconnect with a normal reason; no reconnect is scheduled afterwards
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), Self::Error>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, filter: &str) -> Result<(), Self::Error>;

    /// Snapshot of the connection flags
    fn session_state(&self) -> SessionState;

    fn is_connected(&self) -> bool {
        self.session_state().connected
    }
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
