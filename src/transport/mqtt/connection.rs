//! Pure connection state management for MQTT client
//!
//! This module contains the session flags, reconnect backoff configuration
//! and MQTT option building.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection flags shared between the event-loop task and the poll loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// ConnAck received and no disconnect seen since
    pub connected: bool,
    /// Last disconnect was unexpected; the poll loop should reconnect
    pub reconnect_pending: bool,
}

impl SessionState {
    pub fn needs_reconnect(&self) -> bool {
        !self.connected && self.reconnect_pending
    }
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// MQTT reason code; 0 is a normal disconnect
    Code(u8),
    /// Broker sent DISCONNECT with a non-normal reason
    Broker(String),
    /// Network or protocol error from the event loop
    Network(String),
}

impl DisconnectReason {
    pub const NORMAL: DisconnectReason = DisconnectReason::Code(0);

    /// Anything but a normal disconnect schedules a reconnect
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, DisconnectReason::Code(0))
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Code(code) => write!(f, "reason code {code}"),
            DisconnectReason::Broker(reason) => write!(f, "broker disconnect: {reason}"),
            DisconnectReason::Network(error) => write!(f, "network error: {error}"),
        }
    }
}

/// Reconnection backoff configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt
    pub min_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait after `failures` consecutive failed attempts:
    /// `min(min_delay * 2^(failures - 1), max_delay)`, zero before any failure
    pub fn delay_after_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("ConnAck not received within {0:?}")]
    ConnAckTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let secure = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(config.broker_url.clone())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url.port().unwrap_or(if secure { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(config.client_id.clone(), host, port);

    if secure {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // Credentials come from the environment, never from the config file
    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mqtt_config() -> MqttSection {
        MqttSection {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
            client_id: "aircon-bridge-test".to_string(),
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = ReconnectConfig::default();

        assert_eq!(config.delay_after_failures(0), Duration::ZERO);
        assert_eq!(config.delay_after_failures(1), Duration::from_secs(1));
        assert_eq!(config.delay_after_failures(2), Duration::from_secs(2));
        assert_eq!(config.delay_after_failures(3), Duration::from_secs(4));
        assert_eq!(config.delay_after_failures(7), Duration::from_secs(64));
        assert_eq!(config.delay_after_failures(8), Duration::from_secs(120));
        assert_eq!(config.delay_after_failures(40), Duration::from_secs(120));
        assert_eq!(config.delay_after_failures(u32::MAX), Duration::from_secs(120));
    }

    #[test]
    fn test_disconnect_reason_classification() {
        assert!(!DisconnectReason::NORMAL.is_unexpected());
        assert!(DisconnectReason::Code(1).is_unexpected());
        assert!(DisconnectReason::Broker("ServerShuttingDown".to_string()).is_unexpected());
        assert!(DisconnectReason::Network("connection reset".to_string()).is_unexpected());
    }

    #[test]
    fn test_needs_reconnect() {
        let mut state = SessionState::default();
        assert!(!state.needs_reconnect());

        state.reconnect_pending = true;
        assert!(state.needs_reconnect());

        state.connected = true;
        assert!(!state.needs_reconnect());
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_mqtt_config()).unwrap();
        assert_eq!(options.client_id(), "aircon-bridge-test");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_tls_port() {
        let mut config = test_mqtt_config();
        config.broker_url = "mqtts://broker.example.com".to_string();

        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address().1, 8883);
    }

    #[test]
    fn test_invalid_broker_url() {
        let mut config = test_mqtt_config();
        config.broker_url = "invalid-url".to_string();
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(MqttError::InvalidBrokerUrl(_))
        ));

        config.broker_url = "http://localhost:1883".to_string();
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::ConnectionFailedStr("test".to_string()),
            MqttError::ConnAckTimeout(Duration::from_secs(10)),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: SessionState::default(),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
