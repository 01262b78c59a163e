//! Top-level error type for the aircon bridge
//!
//! Each layer has its own error enum; [`BridgeError`] wraps them so `main`
//! and the bridge wiring can use `?` across layers.

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::protocol::CommandError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors that end the process with a non-zero status
    ///
    /// Only a recoverable gateway error is not fatal; everything else means
    /// the configuration or the units disagree with the bridge.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Gateway(e) => !e.is_recoverable(),
            _ => true,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_conversions() {
        let err: BridgeError = ConfigError::InvalidConfig("no inverters".to_string()).into();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("no inverters"));

        let err: BridgeError = CommandError::UnknownDevice("Attic".to_string()).into();
        assert!(matches!(err, BridgeError::Command(_)));
    }

    #[test]
    fn test_fatality() {
        assert!(!BridgeError::from(GatewayError::Timeout(Duration::from_secs(1))).is_fatal());
        assert!(BridgeError::from(GatewayError::Rejected {
            command: "getAirconStat".to_string(),
            result: 1,
        })
        .is_fatal());
        assert!(BridgeError::internal("boom").is_fatal());
    }
}
