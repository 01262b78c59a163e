//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] and a mock [`DeviceGateway`] so the session,
//! poll loop and dispatcher can be exercised without a broker or real units.

use crate::gateway::{DeviceGateway, GatewayError};
use crate::protocol::{AttributeSet, OperationMode, PartialUpdate};
use crate::transport::mqtt::{ConnectionEvent, DisconnectReason, HealthMonitor};
use crate::transport::{SessionState, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockTransportError {
    #[error("mock broker refused the connection")]
    ConnectRefused,
    #[error("mock transport is not connected")]
    NotConnected,
}

/// One message handed to [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct TransportInner {
    state: SessionState,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<String>,
    fail_connect: bool,
    connect_count: usize,
    reconnect_count: usize,
}

/// Mock transport for testing
///
/// Connection state follows the same transitions as the MQTT client, so a
/// failed connect leaves a reconnect pending.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Mutex<TransportInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut TransportInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.with_inner(|inner| inner.published.clone())
    }

    /// Published messages whose topic ends with `suffix`
    pub fn published_to(&self, suffix: &str) -> Vec<PublishedMessage> {
        self.with_inner(|inner| {
            inner
                .published
                .iter()
                .filter(|m| m.topic.ends_with(suffix))
                .cloned()
                .collect()
        })
    }

    pub fn clear_published(&self) {
        self.with_inner(|inner| inner.published.clear());
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.with_inner(|inner| inner.subscriptions.clone())
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.with_inner(|inner| inner.fail_connect = fail);
    }

    pub fn connect_count(&self) -> usize {
        self.with_inner(|inner| inner.connect_count)
    }

    pub fn reconnect_count(&self) -> usize {
        self.with_inner(|inner| inner.reconnect_count)
    }

    /// Drop the connection as if the broker sent DISCONNECT with `reason`
    pub fn simulate_disconnect(&self, reason: DisconnectReason) {
        self.with_inner(|inner| {
            inner.state = HealthMonitor::determine_next_state(
                inner.state,
                &ConnectionEvent::Disconnected(reason),
            );
        });
    }

    fn establish(&self) -> Result<(), MockTransportError> {
        self.with_inner(|inner| {
            let event = if inner.fail_connect {
                ConnectionEvent::ConnectFailed("connection refused".to_string())
            } else {
                ConnectionEvent::ConnAckReceived
            };
            inner.state = HealthMonitor::determine_next_state(inner.state, &event);

            if inner.state.connected {
                Ok(())
            } else {
                Err(MockTransportError::ConnectRefused)
            }
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&self) -> Result<(), Self::Error> {
        self.with_inner(|inner| inner.connect_count += 1);
        self.establish()
    }

    async fn reconnect(&self) -> Result<(), Self::Error> {
        self.with_inner(|inner| inner.reconnect_count += 1);
        self.establish()
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.simulate_disconnect(DisconnectReason::NORMAL);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), Self::Error> {
        self.with_inner(|inner| {
            if !inner.state.connected {
                return Err(MockTransportError::NotConnected);
            }
            inner.published.push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                retain,
            });
            Ok(())
        })
    }

    async fn subscribe(&self, filter: &str) -> Result<(), Self::Error> {
        self.with_inner(|inner| {
            if !inner.state.connected {
                return Err(MockTransportError::NotConnected);
            }
            inner.subscriptions.push(filter.to_string());
            Ok(())
        })
    }

    fn session_state(&self) -> SessionState {
        self.with_inner(|inner| inner.state)
    }
}

/// Scripted answer for one gateway query
#[derive(Debug, Clone)]
pub enum MockResponse {
    State(AttributeSet),
    /// Timeout; the poll loop skips the device
    Recoverable,
    /// Rejected by the unit; the poll loop stops
    Unrecoverable,
}

impl MockResponse {
    fn into_result(self, command: &str) -> Result<AttributeSet, GatewayError> {
        match self {
            MockResponse::State(state) => Ok(state),
            MockResponse::Recoverable => Err(GatewayError::Timeout(Duration::from_secs(10))),
            MockResponse::Unrecoverable => Err(GatewayError::Rejected {
                command: command.to_string(),
                result: 1,
            }),
        }
    }
}

#[derive(Debug, Default)]
struct GatewayInner {
    states: HashMap<String, AttributeSet>,
    scripted: HashMap<String, VecDeque<MockResponse>>,
    apply_failures: HashMap<String, VecDeque<MockResponse>>,
    queries: Vec<String>,
    applied: Vec<(String, PartialUpdate)>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

/// Mock gateway for testing
///
/// Queries return scripted responses first, then the stored state of the
/// address (or [`MockGateway::sample_state`]). Applies are recorded and
/// overlaid onto the stored state.
#[derive(Debug, Default)]
pub struct MockGateway {
    inner: Mutex<GatewayInner>,
    delay: Option<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every operation for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A unit heating to 21.0 at airflow 2
    pub fn sample_state() -> AttributeSet {
        AttributeSet {
            power: Some(true),
            preset_temperature: Some(21.0),
            operation_mode: Some(OperationMode::Heat),
            airflow: Some(2),
            auto_3d: Some(false),
            wind_ud: Some(1),
            wind_lr: Some(3),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut GatewayInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_state(&self, address: &str, state: AttributeSet) {
        self.with_inner(|inner| {
            inner.states.insert(address.to_string(), state);
        });
    }

    pub fn state(&self, address: &str) -> Option<AttributeSet> {
        self.with_inner(|inner| inner.states.get(address).cloned())
    }

    /// Queue a one-shot answer for the next query of `address`
    pub fn push_response(&self, address: &str, response: MockResponse) {
        self.with_inner(|inner| {
            inner
                .scripted
                .entry(address.to_string())
                .or_default()
                .push_back(response);
        });
    }

    /// Queue a one-shot failure for the next apply to `address`
    pub fn push_apply_failure(&self, address: &str, response: MockResponse) {
        self.with_inner(|inner| {
            inner
                .apply_failures
                .entry(address.to_string())
                .or_default()
                .push_back(response);
        });
    }

    /// Addresses queried, in order
    pub fn queries(&self) -> Vec<String> {
        self.with_inner(|inner| inner.queries.clone())
    }

    pub fn applied(&self) -> Vec<(String, PartialUpdate)> {
        self.with_inner(|inner| inner.applied.clone())
    }

    /// Highest number of overlapping operations seen for `address`
    pub fn max_concurrent(&self, address: &str) -> usize {
        self.with_inner(|inner| inner.max_in_flight.get(address).copied().unwrap_or(0))
    }

    fn enter(&self, address: &str) {
        self.with_inner(|inner| {
            let current = inner.in_flight.entry(address.to_string()).or_insert(0);
            *current += 1;
            let current = *current;
            let max = inner.max_in_flight.entry(address.to_string()).or_insert(0);
            *max = (*max).max(current);
        });
    }

    fn leave(&self, address: &str) {
        self.with_inner(|inner| {
            if let Some(current) = inner.in_flight.get_mut(address) {
                *current = current.saturating_sub(1);
            }
        });
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DeviceGateway for MockGateway {
    async fn query(&self, address: &str) -> Result<AttributeSet, GatewayError> {
        self.enter(address);
        self.pause().await;
        let response = self.with_inner(|inner| {
            inner.queries.push(address.to_string());
            inner
                .scripted
                .get_mut(address)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    MockResponse::State(
                        inner
                            .states
                            .get(address)
                            .cloned()
                            .unwrap_or_else(Self::sample_state),
                    )
                })
        });
        self.leave(address);
        response.into_result("getAirconStat")
    }

    async fn apply(&self, address: &str, update: &PartialUpdate) -> Result<(), GatewayError> {
        self.enter(address);
        self.pause().await;
        let failure = self.with_inner(|inner| {
            let failure = inner
                .apply_failures
                .get_mut(address)
                .and_then(VecDeque::pop_front);
            if failure.is_none() {
                inner.applied.push((address.to_string(), update.clone()));
                let state = inner
                    .states
                    .entry(address.to_string())
                    .or_insert_with(Self::sample_state);
                state.power = update.power.or(state.power);
                state.preset_temperature = update.preset_temperature.or(state.preset_temperature);
                state.airflow = update.airflow.or(state.airflow);
                state.wind_ud = update.wind_ud.or(state.wind_ud);
                state.wind_lr = update.wind_lr.or(state.wind_lr);
            }
            failure
        });
        self.leave(address);

        match failure {
            Some(response) => response.into_result("setAirconStat").map(|_| ()),
            None => Ok(()),
        }
    }
}
