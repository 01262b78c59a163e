//! Inverter attribute model and MQTT payload formatting
//!
//! An [`AttributeSet`] is the decoded state of one unit as returned by a poll.
//! A [`PartialUpdate`] carries the subset of settable fields for a single set
//! operation; fields left as `None` are never written to the device.

use serde::{Deserialize, Serialize};

/// Operation mode reported and accepted by the inverter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Auto,
    Cool,
    Heat,
    Fan,
    Dry,
}

impl OperationMode {
    /// Numeric mode code as published on `operation_mode`
    pub fn code(self) -> u8 {
        match self {
            OperationMode::Auto => 0,
            OperationMode::Cool => 1,
            OperationMode::Heat => 2,
            OperationMode::Fan => 3,
            OperationMode::Dry => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OperationMode::Auto),
            1 => Some(OperationMode::Cool),
            2 => Some(OperationMode::Heat),
            3 => Some(OperationMode::Fan),
            4 => Some(OperationMode::Dry),
            _ => None,
        }
    }
}

/// Attributes published for every polled device, in publish order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    PowerStatus,
    PresetTemperature,
    OperationMode,
    Airflow,
    Auto3d,
    WindUd,
    WindLr,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::PowerStatus,
        Attribute::PresetTemperature,
        Attribute::OperationMode,
        Attribute::Airflow,
        Attribute::Auto3d,
        Attribute::WindUd,
        Attribute::WindLr,
    ];

    /// Topic segment used under `<prefix>/<device>/`
    ///
    /// `preset_temperatur` is spelled the way existing subscribers expect it.
    pub fn topic_name(self) -> &'static str {
        match self {
            Attribute::PowerStatus => "power_status",
            Attribute::PresetTemperature => "preset_temperatur",
            Attribute::OperationMode => "operation_mode",
            Attribute::Airflow => "airflow",
            Attribute::Auto3d => "auto_3d",
            Attribute::WindUd => "wind_ud",
            Attribute::WindLr => "wind_lr",
        }
    }

    pub fn from_topic_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.topic_name() == name)
    }
}

/// Polled state of one inverter; every field stays `None` until known
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub power: Option<bool>,
    pub preset_temperature: Option<f32>,
    pub operation_mode: Option<OperationMode>,
    /// Fan level 0 (auto) to 4
    pub airflow: Option<u8>,
    pub auto_3d: Option<bool>,
    /// Vertical louvre 0 (auto) to 4
    pub wind_ud: Option<u8>,
    /// Horizontal louvre 0 (auto) to 7
    pub wind_lr: Option<u8>,
}

impl AttributeSet {
    /// Text payload for one attribute; unknown values publish as empty payloads
    pub fn payload(&self, attribute: Attribute) -> String {
        match attribute {
            Attribute::PowerStatus => self
                .power
                .map(|on| bool_to_onoff(on).to_string())
                .unwrap_or_default(),
            Attribute::PresetTemperature => self
                .preset_temperature
                .map(format_temperature)
                .unwrap_or_default(),
            Attribute::OperationMode => self
                .operation_mode
                .map(|mode| mode.code().to_string())
                .unwrap_or_default(),
            Attribute::Airflow => format_optional(self.airflow),
            Attribute::Auto3d => self
                .auto_3d
                .map(|on| u8::from(on).to_string())
                .unwrap_or_default(),
            Attribute::WindUd => format_optional(self.wind_ud),
            Attribute::WindLr => format_optional(self.wind_lr),
        }
    }

    /// All attribute payloads in publish order
    pub fn payloads(&self) -> Vec<(Attribute, String)> {
        Attribute::ALL
            .into_iter()
            .map(|attr| (attr, self.payload(attr)))
            .collect()
    }
}

/// Settable fields for a single device write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialUpdate {
    pub power: Option<bool>,
    pub preset_temperature: Option<f32>,
    pub airflow: Option<u8>,
    pub wind_ud: Option<u8>,
    pub wind_lr: Option<u8>,
}

impl PartialUpdate {
    pub fn power(on: bool) -> Self {
        Self {
            power: Some(on),
            ..Default::default()
        }
    }

    pub fn preset_temperature(celsius: f32) -> Self {
        Self {
            preset_temperature: Some(celsius),
            ..Default::default()
        }
    }

    pub fn airflow(level: u8) -> Self {
        Self {
            airflow: Some(level),
            ..Default::default()
        }
    }

    pub fn wind_ud(position: u8) -> Self {
        Self {
            wind_ud: Some(position),
            ..Default::default()
        }
    }

    pub fn wind_lr(position: u8) -> Self {
        Self {
            wind_lr: Some(position),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.preset_temperature.is_none()
            && self.airflow.is_none()
            && self.wind_ud.is_none()
            && self.wind_lr.is_none()
    }
}

pub fn bool_to_onoff(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Temperatures always carry a fractional digit (`21.0`, `22.5`)
pub fn format_temperature(celsius: f32) -> String {
    if celsius.fract() == 0.0 {
        format!("{celsius:.1}")
    } else {
        format!("{celsius}")
    }
}

fn format_optional(value: Option<u8>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
