//! Inbound set commands and their payload validation
//!
//! A command arrives as `<prefix>/<device>/<attribute>/set` with a text
//! payload. Validation turns it into a [`PartialUpdate`] carrying exactly one
//! field. Invalid commands are reported through [`CommandError`] and dropped
//! by the dispatcher; they are never answered on the broker.

use super::attributes::PartialUpdate;
use super::topics::TopicBuilder;
use thiserror::Error;

/// Attributes that accept set commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAttribute {
    Power,
    Temperature,
    Airflow,
    VerticalDirection,
    HorizontalDirection,
}

impl CommandAttribute {
    pub fn from_topic_name(name: &str) -> Option<Self> {
        match name {
            "power_status" => Some(CommandAttribute::Power),
            "preset_temperatur" => Some(CommandAttribute::Temperature),
            "airflow" => Some(CommandAttribute::Airflow),
            "wind_ud" => Some(CommandAttribute::VerticalDirection),
            "wind_lr" => Some(CommandAttribute::HorizontalDirection),
            _ => None,
        }
    }

    pub fn topic_name(self) -> &'static str {
        match self {
            CommandAttribute::Power => "power_status",
            CommandAttribute::Temperature => "preset_temperatur",
            CommandAttribute::Airflow => "airflow",
            CommandAttribute::VerticalDirection => "wind_ud",
            CommandAttribute::HorizontalDirection => "wind_lr",
        }
    }

    /// Inclusive upper bound for integer attributes
    fn max_value(self) -> Option<i64> {
        match self {
            CommandAttribute::Airflow | CommandAttribute::VerticalDirection => Some(4),
            CommandAttribute::HorizontalDirection => Some(7),
            CommandAttribute::Power | CommandAttribute::Temperature => None,
        }
    }
}

/// One parsed, not yet validated, set command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_name: String,
    pub attribute: CommandAttribute,
    pub raw_value: String,
}

impl Command {
    /// Parse topic and payload of an inbound message
    pub fn from_message(
        topics: &TopicBuilder,
        topic: &str,
        payload: &[u8],
    ) -> Result<Self, CommandError> {
        let (device, attribute) = topics
            .parse_command_topic(topic)
            .ok_or_else(|| CommandError::MalformedTopic(topic.to_string()))?;

        let attribute = CommandAttribute::from_topic_name(attribute)
            .ok_or_else(|| CommandError::UnsupportedAttribute(attribute.to_string()))?;

        let raw_value = std::str::from_utf8(payload)
            .map_err(|_| CommandError::NonUtf8Payload {
                attribute: attribute.topic_name(),
            })?
            .to_string();

        Ok(Self {
            device_name: device.to_string(),
            attribute,
            raw_value,
        })
    }

    /// Validate the payload and build the single-field update
    pub fn validate(&self) -> Result<PartialUpdate, CommandError> {
        match self.attribute {
            CommandAttribute::Power => parse_power(&self.raw_value).map(PartialUpdate::power),
            CommandAttribute::Temperature => {
                parse_temperature(&self.raw_value).map(PartialUpdate::preset_temperature)
            }
            CommandAttribute::Airflow => {
                parse_ranged(self.attribute, &self.raw_value).map(PartialUpdate::airflow)
            }
            CommandAttribute::VerticalDirection => {
                parse_ranged(self.attribute, &self.raw_value).map(PartialUpdate::wind_ud)
            }
            CommandAttribute::HorizontalDirection => {
                parse_ranged(self.attribute, &self.raw_value).map(PartialUpdate::wind_lr)
            }
        }
    }
}

/// Command validation errors
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Not a command topic: {0}")]
    MalformedTopic(String),
    #[error("Device '{0}' is not configured")]
    UnknownDevice(String),
    #[error("Attribute '{0}' cannot be set")]
    UnsupportedAttribute(String),
    #[error("Payload for {attribute} is not valid UTF-8")]
    NonUtf8Payload { attribute: &'static str },
    #[error("Invalid payload '{payload}' for {attribute}: {reason}")]
    InvalidPayload {
        attribute: &'static str,
        payload: String,
        reason: &'static str,
    },
    #[error("{attribute} value {value} outside range {min}-{max}")]
    OutOfRange {
        attribute: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Power payloads are case-sensitive `ON` / `OFF`
pub fn parse_power(raw: &str) -> Result<bool, CommandError> {
    match raw {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(CommandError::InvalidPayload {
            attribute: CommandAttribute::Power.topic_name(),
            payload: raw.to_string(),
            reason: "expected ON or OFF",
        }),
    }
}

fn parse_temperature(raw: &str) -> Result<f32, CommandError> {
    let invalid = |reason| CommandError::InvalidPayload {
        attribute: CommandAttribute::Temperature.topic_name(),
        payload: raw.to_string(),
        reason,
    };

    let value: f32 = raw.trim().parse().map_err(|_| invalid("not a number"))?;
    if !value.is_finite() {
        return Err(invalid("not a finite number"));
    }
    Ok(value)
}

fn parse_ranged(attribute: CommandAttribute, raw: &str) -> Result<u8, CommandError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidPayload {
            attribute: attribute.topic_name(),
            payload: raw.to_string(),
            reason: "not an integer",
        })?;

    let max = attribute.max_value().unwrap_or(i64::from(u8::MAX));
    if !(0..=max).contains(&value) {
        return Err(CommandError::OutOfRange {
            attribute: attribute.topic_name(),
            value,
            min: 0,
            max,
        });
    }

    // Range check above guarantees the value fits
    Ok(value as u8)
}
