//! Bridge wiring and lifecycle
//!
//! Startup order: open the broker session (a failed first connect is logged
//! and retried by the poll loop), start the command dispatcher, then run the
//! poll loop on the calling task. Shutdown reverses it: normal disconnect,
//! then stop the dispatcher.

use crate::config::BridgeConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::gateway::{AirconGateway, DeviceGateway};
use crate::poll_loop::PollLoop;
use crate::protocol::TopicBuilder;
use crate::registry::DeviceRegistry;
use crate::session::BrokerSession;
use crate::transport::mqtt::MqttClient;
use crate::transport::{InboundMessage, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Capacity of the inbound command queue
const INBOUND_QUEUE_CAPACITY: usize = 64;

/// How long shutdown waits for the dispatcher to finish its current command
const DISPATCHER_GRACE: Duration = Duration::from_secs(2);

/// The running bridge, with transport and gateway injected
pub struct Bridge<T, G>
where
    T: Transport + 'static,
    G: DeviceGateway + 'static,
{
    config: BridgeConfig,
    transport: Arc<T>,
    gateway: Arc<G>,
    registry: Arc<DeviceRegistry>,
    topics: TopicBuilder,
    inbound_rx: mpsc::Receiver<InboundMessage>,
}

impl Bridge<MqttClient, AirconGateway> {
    /// Production wiring: MQTT transport and the aircon HTTP gateway
    pub fn from_config(config: BridgeConfig) -> BridgeResult<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let transport = MqttClient::new(&config.mqtt, inbound_tx)?;
        let gateway = AirconGateway::new(&config.gateway)?;
        Ok(Self::new(
            config,
            Arc::new(transport),
            Arc::new(gateway),
            inbound_rx,
        ))
    }
}

impl<T, G> Bridge<T, G>
where
    T: Transport + 'static,
    G: DeviceGateway + 'static,
{
    /// `inbound_rx` must receive whatever the transport gets on subscribed topics
    pub fn new(
        config: BridgeConfig,
        transport: Arc<T>,
        gateway: Arc<G>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::from_config(&config.inverters));
        let topics = TopicBuilder::new(&config.bridge.topic_prefix);
        Self {
            config,
            transport,
            gateway,
            registry,
            topics,
            inbound_rx,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Run until `shutdown_rx` turns true or polling hits an unrecoverable error
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> BridgeResult<()> {
        let Bridge {
            config,
            transport,
            gateway,
            registry,
            topics,
            inbound_rx,
        } = self;

        info!(
            prefix = %topics.prefix(),
            devices = ?registry.names(),
            "Starting aircon bridge"
        );

        let mut session = BrokerSession::new(Arc::clone(&transport), topics.clone(), registry.names());
        if let Err(e) = session.connect().await {
            warn!("Initial MQTT connect failed, retrying from the poll loop: {}", e);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            topics,
            config.bridge.device_timeout(),
        );
        let mut dispatcher_handle = dispatcher.spawn(inbound_rx, stop_rx);

        let mut poll_loop = PollLoop::new(
            session,
            gateway,
            registry,
            config.bridge.interval(),
            config.bridge.device_timeout(),
            shutdown_rx,
        );
        let result = poll_loop.run().await;

        if let Err(e) = poll_loop.session().disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }

        stop_tx.send_replace(true);
        if tokio::time::timeout(DISPATCHER_GRACE, &mut dispatcher_handle)
            .await
            .is_err()
        {
            warn!("Command dispatcher didn't stop in time, aborting");
            dispatcher_handle.abort();
        }

        match result {
            Ok(()) => {
                info!("Aircon bridge stopped");
                Ok(())
            }
            Err(e) => {
                error!("Aircon bridge stopped on gateway error: {}", e);
                Err(BridgeError::from(e))
            }
        }
    }
}
