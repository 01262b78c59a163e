//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for handling MQTT events and the
//! forwarder that hands inbound publishes to the command queue.

use super::connection::DisconnectReason;
use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{DisconnectReasonCode, Packet};
use rumqttc::v5::{mqttbytes::QoS, Event};
use rumqttc::Outgoing;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                }),
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(Self::disconnect_reason(&disconnect.reason_code))
                }
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    reason_codes: format!("{:?}", suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Map a broker DISCONNECT reason code (pure function)
    pub fn disconnect_reason(code: &DisconnectReasonCode) -> DisconnectReason {
        if matches!(code, DisconnectReasonCode::NormalDisconnection) {
            DisconnectReason::NORMAL
        } else {
            DisconnectReason::Broker(format!("{code:?}"))
        }
    }

    /// Determine QoS level based on message type (pure function)
    pub fn determine_qos_level(retain: bool) -> QoS {
        match retain {
            true => QoS::AtLeastOnce, // identity messages must survive for late subscribers
            false => QoS::AtMostOnce, // state is republished every interval
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    Disconnected(DisconnectReason),
    /// Our DISCONNECT has been written to the socket
    DisconnectSent,
    /// Subscription confirmed with reason codes
    SubscriptionConfirmed { packet_id: u16, reason_codes: String },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Hands inbound messages to the dispatcher queue (impure I/O)
///
/// Uses `try_send` so the network task never waits on the dispatcher; a full
/// queue drops the message with a warning.
#[derive(Debug, Clone)]
pub struct MessageForwarder {
    sender: mpsc::Sender<InboundMessage>,
}

impl MessageForwarder {
    pub fn new(sender: mpsc::Sender<InboundMessage>) -> Self {
        Self { sender }
    }

    /// Returns true if the message was queued
    pub fn forward(&self, message: InboundMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(topic = %message.topic, "Command queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(topic = %message.topic, "Command queue closed, dropping message");
                false
            }
        }
    }
}
