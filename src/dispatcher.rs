//! Inbound command handling
//!
//! Drains the inbound queue on its own task so commands never wait for the
//! poll loop. Each message is parsed, validated, resolved against the
//! registry and applied under the device's I/O lock. Failures are logged and
//! the command is dropped; nothing is retried or reported on the broker.

use crate::gateway::{with_timeout, DeviceGateway, GatewayError};
use crate::protocol::{Command, CommandError, PartialUpdate, TopicBuilder};
use crate::registry::DeviceRegistry;
use crate::transport::InboundMessage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// A command that reached its unit
///
/// Retained commands are applied like live ones; the broker replays them
/// once per subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub device: String,
    pub update: PartialUpdate,
    pub retained: bool,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Applying update to {device} failed: {source}")]
    Gateway {
        device: String,
        #[source]
        source: GatewayError,
    },
}

/// Validates commands and applies them through the gateway
pub struct CommandDispatcher<G: DeviceGateway> {
    gateway: Arc<G>,
    registry: Arc<DeviceRegistry>,
    topics: TopicBuilder,
    device_timeout: Duration,
}

impl<G: DeviceGateway + 'static> CommandDispatcher<G> {
    pub fn new(
        gateway: Arc<G>,
        registry: Arc<DeviceRegistry>,
        topics: TopicBuilder,
        device_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            topics,
            device_timeout,
        }
    }

    /// Handle one inbound message
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<DispatchOutcome, DispatchError> {
        let command = Command::from_message(&self.topics, &message.topic, &message.payload)?;

        let device = self
            .registry
            .get(&command.device_name)
            .ok_or_else(|| CommandError::UnknownDevice(command.device_name.clone()))?;

        let update = command.validate()?;

        info!(
            device = %device.name,
            attribute = command.attribute.topic_name(),
            value = %command.raw_value,
            retained = message.retain,
            "Applying command"
        );

        let span = crate::device_span!(op = "apply", device = %device.name, address = %device.address);
        let _io = device.lock_io().await;
        with_timeout(
            self.device_timeout,
            self.gateway.apply(&device.address, &update),
        )
        .instrument(span)
        .await
        .map_err(|source| DispatchError::Gateway {
            device: device.name.clone(),
            source,
        })?;

        Ok(DispatchOutcome {
            device: device.name.clone(),
            update,
            retained: message.retain,
        })
    }

    /// Dispatch and log; never fails
    pub async fn handle(&self, message: &InboundMessage) {
        match self.dispatch(message).await {
            Ok(outcome) => {
                debug!(device = %outcome.device, topic = %message.topic, "Command applied");
            }
            Err(DispatchError::Command(CommandError::MalformedTopic(topic))) => {
                debug!(topic = %topic, "Ignoring message outside the command layout");
            }
            Err(DispatchError::Command(e @ CommandError::UnknownDevice(_))) => {
                error!(topic = %message.topic, "Discarding command: {}", e);
            }
            Err(DispatchError::Command(e)) => {
                warn!(topic = %message.topic, "Discarding invalid command: {}", e);
            }
            Err(e @ DispatchError::Gateway { .. }) => {
                error!(topic = %message.topic, "{}", e);
            }
        }
    }

    /// Drain `inbound` until it closes or shutdown is signalled
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Command dispatcher started");

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.handle(&message).await,
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Command dispatcher stopped");
    }

    pub fn spawn(
        self,
        inbound: mpsc::Receiver<InboundMessage>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound, shutdown_rx))
    }
}
