//! Broker session: connection lifecycle on top of a [`Transport`]
//!
//! The session owns what happens around a connection: subscribing to the
//! command filter and advertising every device name after each ConnAck, and
//! pacing reconnect attempts with exponential backoff. Publishing is
//! best-effort; while disconnected, messages are dropped rather than queued.

use crate::protocol::{AttributeSet, TopicBuilder};
use crate::transport::mqtt::{
    HealthMonitor, ReconnectConfig, ReconnectTracker, ReconnectionDecision,
};
use crate::transport::{SessionState, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of [`BrokerSession::reconnect_if_pending`]
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectOutcome {
    /// Connected, or the last disconnect was normal
    NotNeeded,
    /// Backoff still running
    Deferred { remaining: Duration },
    Reconnected,
    Failed { attempt: u32 },
}

/// Connection lifecycle and best-effort publishing
pub struct BrokerSession<T: Transport> {
    transport: Arc<T>,
    topics: TopicBuilder,
    device_names: Vec<String>,
    reconnect_config: ReconnectConfig,
    tracker: ReconnectTracker,
}

impl<T: Transport> BrokerSession<T> {
    pub fn new(transport: Arc<T>, topics: TopicBuilder, device_names: Vec<String>) -> Self {
        Self {
            transport,
            topics,
            device_names,
            reconnect_config: ReconnectConfig::default(),
            tracker: ReconnectTracker::default(),
        }
    }

    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    pub fn state(&self) -> SessionState {
        self.transport.session_state()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Consecutive failed connection attempts
    pub fn failed_attempts(&self) -> u32 {
        self.tracker.failures
    }

    /// Initial connect
    ///
    /// A failure leaves the session with a reconnect pending; the poll loop
    /// retries it with backoff.
    pub async fn connect(&mut self) -> Result<(), T::Error> {
        match self.transport.connect().await {
            Ok(()) => {
                self.tracker.reset();
                self.on_connect().await;
                Ok(())
            }
            Err(e) => {
                self.tracker.record_failure(Instant::now());
                Err(e)
            }
        }
    }

    /// Attempt one reconnect if one is pending and the backoff allows it
    pub async fn reconnect_if_pending(&mut self) -> ReconnectOutcome {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.transport.session_state(),
            &self.tracker,
            &self.reconnect_config,
            Instant::now(),
            false,
        );

        match decision {
            ReconnectionDecision::NotNeeded | ReconnectionDecision::AbortShutdownRequested => {
                ReconnectOutcome::NotNeeded
            }
            ReconnectionDecision::Wait { remaining } => {
                debug!(?remaining, "Reconnect deferred by backoff");
                ReconnectOutcome::Deferred { remaining }
            }
            ReconnectionDecision::Proceed { attempt } => {
                info!(attempt, "Attempting MQTT reconnect");
                match self.transport.reconnect().await {
                    Ok(()) => {
                        info!(attempt, "MQTT reconnect succeeded");
                        self.tracker.reset();
                        self.on_connect().await;
                        ReconnectOutcome::Reconnected
                    }
                    Err(e) => {
                        self.tracker.record_failure(Instant::now());
                        warn!(
                            attempt,
                            next_delay = ?self.reconnect_config.delay_after_failures(self.tracker.failures),
                            "MQTT reconnect failed: {}",
                            e
                        );
                        ReconnectOutcome::Failed { attempt }
                    }
                }
            }
        }
    }

    /// Runs after every successful connect or reconnect
    async fn on_connect(&self) {
        let filter = self.topics.command_filter();
        if let Err(e) = self.transport.subscribe(&filter).await {
            error!(filter = %filter, "Failed to subscribe to command topics: {}", e);
        }
        self.advertise_devices().await;
    }

    /// Publish every device name as a retained identity message
    pub async fn advertise_devices(&self) {
        for name in &self.device_names {
            self.publish_identity(name).await;
        }
    }

    /// Retained `<prefix>/<name>/name`
    pub async fn publish_identity(&self, name: &str) {
        let topic = self.topics.name_topic(name);
        self.publish(&topic, name.as_bytes().to_vec(), true).await;
    }

    /// Publish all seven attributes of a device, non-retained
    pub async fn publish_state(&self, name: &str, state: &AttributeSet) {
        for (attribute, payload) in state.payloads() {
            let topic = self.topics.attribute_topic(name, attribute);
            self.publish(&topic, payload.into_bytes(), false).await;
        }
    }

    /// Best-effort publish; dropped while disconnected
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) {
        if !self.transport.is_connected() {
            debug!(topic = %topic, "Not connected, dropping publish");
            return;
        }

        if let Err(e) = self.transport.publish(topic, payload, retain).await {
            warn!(topic = %topic, "Publish failed: {}", e);
        }
    }

    /// Normal disconnect; no reconnect follows
    pub async fn disconnect(&self) -> Result<(), T::Error> {
        self.transport.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OperationMode;
    use crate::testing::mocks::MockTransport;
    use crate::transport::mqtt::DisconnectReason;

    fn session(transport: Arc<MockTransport>) -> BrokerSession<MockTransport> {
        BrokerSession::new(
            transport,
            TopicBuilder::new("klima"),
            vec!["Lounge".to_string(), "Office".to_string()],
        )
    }

    #[tokio::test]
    async fn test_connect_subscribes_and_advertises() {
        let transport = Arc::new(MockTransport::new());
        let mut session = session(transport.clone());

        session.connect().await.unwrap();

        assert_eq!(transport.subscriptions(), vec!["klima/+/+/set"]);
        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "klima/Lounge/name");
        assert_eq!(published[0].payload, b"Lounge");
        assert!(published[0].retain);
        assert_eq!(published[1].topic, "klima/Office/name");
    }

    #[tokio::test]
    async fn test_publish_dropped_while_disconnected() {
        let transport = Arc::new(MockTransport::new());
        let session = session(transport.clone());

        session.publish("klima/Lounge/airflow", b"2".to_vec(), false).await;
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_state_is_not_retained() {
        let transport = Arc::new(MockTransport::new());
        let mut session = session(transport.clone());
        session.connect().await.unwrap();
        transport.clear_published();

        let state = AttributeSet {
            power: Some(false),
            preset_temperature: Some(21.0),
            operation_mode: Some(OperationMode::Heat),
            airflow: Some(0),
            auto_3d: Some(true),
            wind_ud: Some(1),
            wind_lr: Some(4),
        };
        session.publish_state("Lounge", &state).await;

        let published = transport.published();
        assert_eq!(published.len(), 7);
        assert!(published.iter().all(|m| !m.retain));
        assert_eq!(published[0].topic, "klima/Lounge/power_status");
        assert_eq!(published[0].payload, b"OFF");
        assert_eq!(published[1].topic, "klima/Lounge/preset_temperatur");
        assert_eq!(published[1].payload, b"21.0");
        assert_eq!(published[2].payload, b"2");
        assert_eq!(published[4].topic, "klima/Lounge/auto_3d");
        assert_eq!(published[4].payload, b"1");
    }

    #[tokio::test]
    async fn test_no_reconnect_after_normal_disconnect() {
        let transport = Arc::new(MockTransport::new());
        let mut session = session(transport.clone());
        session.connect().await.unwrap();

        transport.simulate_disconnect(DisconnectReason::NORMAL);
        assert_eq!(session.reconnect_if_pending().await, ReconnectOutcome::NotNeeded);
        assert_eq!(transport.reconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff() {
        let transport = Arc::new(MockTransport::new());
        let mut session = session(transport.clone());
        session.connect().await.unwrap();

        transport.simulate_disconnect(DisconnectReason::Code(1));
        transport.set_fail_connect(true);

        // First attempt is immediate
        assert_eq!(
            session.reconnect_if_pending().await,
            ReconnectOutcome::Failed { attempt: 1 }
        );

        // Second attempt waits 1s
        assert!(matches!(
            session.reconnect_if_pending().await,
            ReconnectOutcome::Deferred { .. }
        ));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            session.reconnect_if_pending().await,
            ReconnectOutcome::Failed { attempt: 2 }
        );

        // Third waits 2s
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(matches!(
            session.reconnect_if_pending().await,
            ReconnectOutcome::Deferred { .. }
        ));

        transport.set_fail_connect(false);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(session.reconnect_if_pending().await, ReconnectOutcome::Reconnected);
        assert_eq!(session.failed_attempts(), 0);
        assert_eq!(transport.reconnect_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_initial_connect_leaves_reconnect_pending() {
        let transport = Arc::new(MockTransport::new());
        transport.set_fail_connect(true);
        let mut session = session(transport.clone());

        assert!(session.connect().await.is_err());
        assert!(session.state().reconnect_pending);
        assert_eq!(session.failed_attempts(), 1);
    }
}
