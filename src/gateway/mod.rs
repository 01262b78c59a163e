//! Device gateway: query and set inverter state
//!
//! [`DeviceGateway`] is the seam between the bridge and the units. The
//! production implementation is [`aircon::AirconGateway`], which speaks the
//! units' local HTTP API; tests use `testing::mocks::MockGateway`.

use crate::protocol::{AttributeSet, PartialUpdate};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod aircon;
pub mod codec;

pub use aircon::AirconGateway;
pub use codec::StatusFrame;

/// Query/apply capability for one kind of unit
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Read the current state of the unit at `address`
    async fn query(&self, address: &str) -> Result<AttributeSet, GatewayError>;

    /// Write the fields set in `update`; unset fields keep their current value
    async fn apply(&self, address: &str, update: &PartialUpdate) -> Result<(), GatewayError>;
}

/// Gateway errors
///
/// Recoverable errors skip the device for one iteration. Unrecoverable ones
/// mean the unit and the bridge disagree about the protocol and end polling.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("Device did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Device answered with HTTP status {status}")]
    Status { status: u16 },
    #[error("Device rejected {command} (result {result})")]
    Rejected { command: String, result: i64 },
    #[error("Response body is not valid JSON: {0}")]
    Malformed(String),
    #[error("Undecodable response: {0}")]
    Decode(String),
    #[error("Cannot encode update: {0}")]
    Encode(String),
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),
}

impl GatewayError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::Http(_)
                | GatewayError::Timeout(_)
                | GatewayError::Status { .. }
                | GatewayError::Malformed(_)
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        GatewayError::Decode(message.into())
    }
}

/// Bound a gateway operation by `limit`
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| GatewayError::Timeout(limit))?
}
