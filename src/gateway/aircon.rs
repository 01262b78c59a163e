//! HTTP gateway for the units' local API
//!
//! Every call is a JSON `POST` to `http://<address>:<port>/beaver/command/<command>`.
//! A response with `result != 0` means the unit refused the call, usually
//! because this operator id is not registered on it.

use super::codec::{extract_status_chunk, StatusFrame};
use super::{DeviceGateway, GatewayError};
use crate::config::GatewaySection;
use crate::protocol::{AttributeSet, PartialUpdate};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

const API_VERSION: &str = "1.0";

/// `getAirconStat` requires an airconId even though the unit ignores it
const PLACEHOLDER_AIRCON_ID: &str = "unused-but-required";

const GET_STATUS: &str = "getAirconStat";
const SET_STATUS: &str = "setAirconStat";
const GET_DEVICE_INFO: &str = "getDeviceInfo";
const UPDATE_ACCOUNT_INFO: &str = "updateAccountInfo";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    api_ver: &'static str,
    command: &'a str,
    device_id: &'a str,
    operator_id: &'a str,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    contents: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    result: Option<i64>,
    #[serde(default)]
    contents: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusContents {
    aircon_id: String,
    aircon_stat: String,
}

/// Identity of a unit as reported by `getDeviceInfo`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub aircon_id: String,
    pub mac_address: String,
}

/// Current status of a unit together with the id needed to write it back
#[derive(Debug, Clone, PartialEq)]
pub struct AirconStatus {
    pub aircon_id: String,
    pub frame: StatusFrame,
}

/// Aircon gateway over reqwest
#[derive(Debug, Clone)]
pub struct AirconGateway {
    client: reqwest::Client,
    operator_id: String,
    device_id: String,
    timezone: String,
    port: u16,
    request_timeout: Duration,
}

impl AirconGateway {
    pub fn new(config: &GatewaySection) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(GatewayError::Http)?;

        Ok(Self {
            client,
            operator_id: config.operator_id.clone(),
            device_id: config.device_id.clone(),
            timezone: config.timezone.clone(),
            port: config.port,
            request_timeout: config.request_timeout(),
        })
    }

    fn command_url(&self, address: &str, command: &str) -> Result<Url, GatewayError> {
        let address = address.trim();
        if address.is_empty() || address.contains('/') {
            return Err(GatewayError::InvalidAddress(address.to_string()));
        }

        Url::parse(&format!(
            "http://{address}:{}/beaver/command/{command}",
            self.port
        ))
        .map_err(|_| GatewayError::InvalidAddress(address.to_string()))
    }

    /// Send one command and return its `contents`
    async fn call(
        &self,
        address: &str,
        command: &str,
        contents: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let url = self.command_url(address, command)?;
        let request = CommandRequest {
            api_ver: API_VERSION,
            command,
            device_id: &self.device_id,
            operator_id: &self.operator_id,
            timestamp: chrono::Utc::now().timestamp(),
            contents,
        };

        debug!(address = %address, command = %command, "Sending aircon command");

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify_transport_error(e))?;
        // Busy adapters sometimes answer with an HTML page
        let parsed: CommandResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Malformed(format!("{command} response: {e}")))?;

        match parsed.result {
            Some(0) => Ok(parsed.contents.unwrap_or(Value::Null)),
            other => Err(GatewayError::Rejected {
                command: command.to_string(),
                result: other.unwrap_or(-1),
            }),
        }
    }

    fn classify_transport_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.request_timeout)
        } else {
            GatewayError::Http(error)
        }
    }

    fn parse_status(command: &str, contents: Value) -> Result<AirconStatus, GatewayError> {
        let contents: StatusContents = serde_json::from_value(contents)
            .map_err(|e| GatewayError::decode(format!("{command} contents: {e}")))?;

        let blob = BASE64
            .decode(contents.aircon_stat.as_bytes())
            .map_err(|e| GatewayError::decode(format!("airconStat is not base64: {e}")))?;
        let frame = StatusFrame::decode(extract_status_chunk(&blob)?)?;

        Ok(AirconStatus {
            aircon_id: contents.aircon_id,
            frame,
        })
    }

    /// Read the full status of a unit
    #[instrument(skip(self))]
    pub async fn get_status(&self, address: &str) -> Result<AirconStatus, GatewayError> {
        let contents = self
            .call(
                address,
                GET_STATUS,
                Some(json!({ "airconId": PLACEHOLDER_AIRCON_ID })),
            )
            .await?;
        Self::parse_status(GET_STATUS, contents)
    }

    /// Read, overlay `update`, write back; returns the state the unit reports
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        address: &str,
        update: &PartialUpdate,
    ) -> Result<AirconStatus, GatewayError> {
        let AirconStatus {
            aircon_id,
            mut frame,
        } = self.get_status(address).await?;

        frame.apply(update)?;
        let payload = BASE64.encode(frame.encode());

        let contents = self
            .call(
                address,
                SET_STATUS,
                Some(json!({ "airconId": aircon_id, "airconStat": payload })),
            )
            .await?;
        Self::parse_status(SET_STATUS, contents)
    }

    pub async fn device_info(&self, address: &str) -> Result<DeviceInfo, GatewayError> {
        let contents = self.call(address, GET_DEVICE_INFO, None).await?;
        serde_json::from_value(contents)
            .map_err(|e| GatewayError::decode(format!("{GET_DEVICE_INFO} contents: {e}")))
    }

    /// Register this operator id on the unit so it accepts our commands
    pub async fn register(&self, address: &str) -> Result<DeviceInfo, GatewayError> {
        let info = self.device_info(address).await?;

        self.call(
            address,
            UPDATE_ACCOUNT_INFO,
            Some(json!({
                "accountId": self.operator_id,
                "airconId": info.aircon_id,
                "remote": 0,
                "timezone": self.timezone,
            })),
        )
        .await?;

        info!(address = %address, aircon_id = %info.aircon_id, "Registered with aircon unit");
        Ok(info)
    }
}

#[async_trait]
impl DeviceGateway for AirconGateway {
    async fn query(&self, address: &str) -> Result<AttributeSet, GatewayError> {
        Ok(self.get_status(address).await?.frame.to_attribute_set())
    }

    async fn apply(&self, address: &str, update: &PartialUpdate) -> Result<(), GatewayError> {
        let updated = self.set_status(address, update).await?;
        debug!(
            address = %address,
            state = ?updated.frame.to_attribute_set(),
            "Unit accepted update"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> AirconGateway {
        AirconGateway::new(&GatewaySection {
            operator_id: "op".to_string(),
            device_id: "bridge".to_string(),
            timezone: "UTC".to_string(),
            port: 51443,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_command_url() {
        let url = gateway()
            .command_url("192.168.1.50", "getAirconStat")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://192.168.1.50:51443/beaver/command/getAirconStat"
        );
    }

    #[test]
    fn test_command_url_rejects_bad_addresses() {
        let gateway = gateway();
        assert!(matches!(
            gateway.command_url("", "getAirconStat"),
            Err(GatewayError::InvalidAddress(_))
        ));
        assert!(matches!(
            gateway.command_url("host/path", "getAirconStat"),
            Err(GatewayError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = CommandRequest {
            api_ver: API_VERSION,
            command: GET_DEVICE_INFO,
            device_id: "bridge",
            operator_id: "op",
            timestamp: 1_700_000_000,
            contents: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "apiVer": "1.0",
                "command": "getDeviceInfo",
                "deviceId": "bridge",
                "operatorId": "op",
                "timestamp": 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_parse_status_rejects_garbage() {
        let result = AirconGateway::parse_status(
            GET_STATUS,
            json!({ "airconId": "abc", "airconStat": "***" }),
        );
        assert!(matches!(result, Err(GatewayError::Decode(_))));

        let result = AirconGateway::parse_status(GET_STATUS, json!({ "airconId": "abc" }));
        assert!(matches!(result, Err(GatewayError::Decode(_))));
    }
}
