//! Binary status frame of the aircon units
//!
//! The units report and accept their settings as an 18-byte status chunk.
//! Every field occupies a masked part of one byte; settable fields also own
//! a control bit. A write sends two frames: the first with every control bit
//! raised ("change this"), the second plain. Each frame is the chunk with
//! byte 5 forced to 255, a fixed trailer and a little-endian CRC-16.

use super::GatewayError;
use crate::protocol::{AttributeSet, OperationMode, PartialUpdate};

/// Length of the status chunk
pub const STATUS_LEN: usize = 18;
/// Status chunk plus trailer plus CRC
pub const FRAME_LEN: usize = STATUS_LEN + TRAILER.len() + 2;

const TRAILER: [u8; 5] = [1, 255, 255, 255, 255];

/// Highest preset temperature that fits the 7-bit half-degree encoding
pub const MAX_PRESET_TEMPERATURE: f32 = 63.5;

#[derive(Debug, Clone, Copy)]
struct Field {
    pos: usize,
    mask: u8,
    control: Option<u8>,
}

impl Field {
    const fn new(pos: usize, mask: u8, control: Option<u8>) -> Self {
        Self { pos, mask, control }
    }

    fn read(&self, chunk: &[u8]) -> u8 {
        let mut byte = chunk[self.pos] & self.mask;
        if let Some(control) = self.control {
            byte &= !control;
        }
        byte
    }

    fn write(&self, buf: &mut [u8], value: u8, is_control: bool) {
        let mut byte = value & self.mask;
        if let (true, Some(control)) = (is_control, self.control) {
            byte |= control;
        }
        buf[self.pos] |= byte;
    }
}

const POWER: Field = Field::new(2, 0b0000_0011, Some(0b0000_0010));
const PRESET_TEMPERATURE: Field = Field::new(4, 0xff, Some(0b1000_0000));
const OPERATION_MODE: Field = Field::new(2, 0b0011_1100, Some(0b0010_0000));
const AIRFLOW: Field = Field::new(3, 0b0000_1111, Some(0b0000_1000));
const AUTO_3D: Field = Field::new(12, 0b0000_1100, Some(0b0000_1000));
const MODEL_NO: Field = Field::new(0, 0b0111_1111, None);
const COOL_HOT_JUDGE: Field = Field::new(8, 0b0000_1000, None);
const VACANT_PROPERTY: Field = Field::new(10, 0b0000_0001, None);
const SELF_CLEAN: Field = Field::new(15, 0b0000_1111, None);
const WIND_UD_AUTO: Field = Field::new(2, 0b1100_0000, Some(0b1000_0000));
const WIND_UD_POS: Field = Field::new(3, 0b1111_0000, Some(0b1000_0000));
const WIND_LR_AUTO: Field = Field::new(12, 0b0000_0011, Some(0b0000_0010));
const WIND_LR_POS: Field = Field::new(11, 0b0001_1111, Some(0b0001_0000));

/// (raw byte, mode)
const MODE_TABLE: [(u8, OperationMode); 5] = [
    (0, OperationMode::Auto),
    (8, OperationMode::Cool),
    (16, OperationMode::Heat),
    (12, OperationMode::Fan),
    (4, OperationMode::Dry),
];

/// (raw byte, fan level)
const AIRFLOW_TABLE: [(u8, u8); 5] = [(7, 0), (0, 1), (1, 2), (2, 3), (6, 4)];

const AUTO_3D_ON: u8 = 4;
const WIND_UD_AUTO_ON: u8 = 64;
const WIND_UD_STEP: u8 = 16;
const WIND_LR_AUTO_ON: u8 = 1;

/// Decoded status chunk
///
/// Louvre positions are kept as their raw components; [`Self::wind_ud`] and
/// [`Self::wind_lr`] map them to the published 0 (auto) .. n values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFrame {
    pub power: Option<bool>,
    pub preset_temperature: Option<f32>,
    pub operation_mode: Option<OperationMode>,
    pub airflow: Option<u8>,
    pub auto_3d: Option<bool>,
    pub model_no: Option<u8>,
    pub cool_hot_judge: Option<u8>,
    pub vacant_property: Option<u8>,
    pub self_clean: Option<u8>,
    /// Unit error display: `00`, `M<nn>` or `E<n>`; informational only
    pub error_code: Option<String>,
    wind_ud_auto: Option<u8>,
    wind_ud_pos: Option<u8>,
    wind_lr_auto: Option<u8>,
    wind_lr_pos: Option<u8>,
}

impl StatusFrame {
    /// Decode an 18-byte status chunk
    pub fn decode(chunk: &[u8]) -> Result<Self, GatewayError> {
        if chunk.len() < STATUS_LEN {
            return Err(GatewayError::decode(format!(
                "status chunk has {} bytes, expected {STATUS_LEN}",
                chunk.len()
            )));
        }

        let mode_byte = OPERATION_MODE.read(chunk);
        let airflow_byte = AIRFLOW.read(chunk);

        Ok(Self {
            power: Some(POWER.read(chunk) == 1),
            preset_temperature: Some(f32::from(PRESET_TEMPERATURE.read(chunk)) / 2.0),
            operation_mode: MODE_TABLE
                .iter()
                .find(|(byte, _)| *byte == mode_byte)
                .map(|(_, mode)| *mode),
            airflow: AIRFLOW_TABLE
                .iter()
                .find(|(byte, _)| *byte == airflow_byte)
                .map(|(_, level)| *level),
            auto_3d: match AUTO_3D.read(chunk) {
                0 => Some(false),
                AUTO_3D_ON => Some(true),
                _ => None,
            },
            model_no: Some(MODEL_NO.read(chunk)),
            cool_hot_judge: Some(u8::from(COOL_HOT_JUDGE.read(chunk) > 0)),
            vacant_property: Some(VACANT_PROPERTY.read(chunk)),
            self_clean: Some(SELF_CLEAN.read(chunk)),
            error_code: Some(error_code(chunk[6])),
            wind_ud_auto: Some(WIND_UD_AUTO.read(chunk)),
            wind_ud_pos: Some(WIND_UD_POS.read(chunk)),
            wind_lr_auto: Some(WIND_LR_AUTO.read(chunk)),
            wind_lr_pos: Some(WIND_LR_POS.read(chunk)),
        })
    }

    /// Vertical louvre: 0 auto, 1..=4 fixed positions
    pub fn wind_ud(&self) -> Option<u8> {
        match (self.wind_ud_auto, self.wind_ud_pos) {
            (Some(WIND_UD_AUTO_ON), _) => Some(0),
            (Some(0), Some(pos)) if pos % WIND_UD_STEP == 0 && pos <= 3 * WIND_UD_STEP => {
                Some(pos / WIND_UD_STEP + 1)
            }
            _ => None,
        }
    }

    /// Horizontal louvre: 0 auto, 1..=7 fixed positions
    pub fn wind_lr(&self) -> Option<u8> {
        match (self.wind_lr_auto, self.wind_lr_pos) {
            (Some(WIND_LR_AUTO_ON), _) => Some(0),
            (Some(0), Some(pos)) if pos <= 6 => Some(pos + 1),
            _ => None,
        }
    }

    pub fn set_wind_ud(&mut self, value: u8) -> Result<(), GatewayError> {
        let (auto, pos) = match value {
            0 => (WIND_UD_AUTO_ON, None),
            1..=4 => (0, Some((value - 1) * WIND_UD_STEP)),
            _ => return Err(GatewayError::Encode(format!("wind_ud {value} out of range"))),
        };
        self.wind_ud_auto = Some(auto);
        self.wind_ud_pos = pos;
        Ok(())
    }

    pub fn set_wind_lr(&mut self, value: u8) -> Result<(), GatewayError> {
        let (auto, pos) = match value {
            0 => (WIND_LR_AUTO_ON, None),
            1..=7 => (0, Some(value - 1)),
            _ => return Err(GatewayError::Encode(format!("wind_lr {value} out of range"))),
        };
        self.wind_lr_auto = Some(auto);
        self.wind_lr_pos = pos;
        Ok(())
    }

    /// Overlay the fields set in `update`
    pub fn apply(&mut self, update: &PartialUpdate) -> Result<(), GatewayError> {
        if let Some(power) = update.power {
            self.power = Some(power);
        }
        if let Some(celsius) = update.preset_temperature {
            if !(0.0..=MAX_PRESET_TEMPERATURE).contains(&celsius) {
                return Err(GatewayError::Encode(format!(
                    "preset temperature {celsius} out of range"
                )));
            }
            self.preset_temperature = Some(celsius);
        }
        if let Some(level) = update.airflow {
            if !AIRFLOW_TABLE.iter().any(|(_, l)| *l == level) {
                return Err(GatewayError::Encode(format!("airflow {level} out of range")));
            }
            self.airflow = Some(level);
        }
        if let Some(position) = update.wind_ud {
            self.set_wind_ud(position)?;
        }
        if let Some(position) = update.wind_lr {
            self.set_wind_lr(position)?;
        }
        Ok(())
    }

    pub fn to_attribute_set(&self) -> AttributeSet {
        AttributeSet {
            power: self.power,
            preset_temperature: self.preset_temperature,
            operation_mode: self.operation_mode,
            airflow: self.airflow,
            auto_3d: self.auto_3d,
            wind_ud: self.wind_ud(),
            wind_lr: self.wind_lr(),
        }
    }

    /// Encode the control frame followed by the plain frame
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * FRAME_LEN);

        for is_control in [true, false] {
            let mut buf = [0u8; STATUS_LEN];
            buf[5] = 255;
            self.write_fields(&mut buf, is_control);

            let start = out.len();
            out.extend_from_slice(&buf);
            out.extend_from_slice(&TRAILER);
            let crc = crc16(&out[start..]);
            out.extend_from_slice(&crc.to_le_bytes());
        }

        out
    }

    fn write_fields(&self, buf: &mut [u8], is_control: bool) {
        let mode = self.operation_mode.unwrap_or(OperationMode::Auto);
        let mode_byte = MODE_TABLE
            .iter()
            .find(|(_, m)| *m == mode)
            .map_or(0, |(byte, _)| *byte);

        let level = self.airflow.unwrap_or(0);
        let airflow_byte = AIRFLOW_TABLE
            .iter()
            .find(|(_, l)| *l == level)
            .map_or(0, |(byte, _)| *byte);

        // Saturating cast; apply() keeps the value within 7 bits
        let temperature_byte = (self.preset_temperature.unwrap_or(0.0) * 2.0) as u8;

        POWER.write(buf, u8::from(self.power.unwrap_or(false)), is_control);
        PRESET_TEMPERATURE.write(buf, temperature_byte, is_control);
        OPERATION_MODE.write(buf, mode_byte, is_control);
        AIRFLOW.write(buf, airflow_byte, is_control);
        AUTO_3D.write(
            buf,
            if self.auto_3d.unwrap_or(false) { AUTO_3D_ON } else { 0 },
            is_control,
        );
        MODEL_NO.write(buf, self.model_no.unwrap_or(0), is_control);
        COOL_HOT_JUDGE.write(buf, self.cool_hot_judge.unwrap_or(0), is_control);
        VACANT_PROPERTY.write(buf, self.vacant_property.unwrap_or(0), is_control);
        SELF_CLEAN.write(buf, self.self_clean.unwrap_or(0), is_control);
        WIND_UD_AUTO.write(buf, self.wind_ud_auto.unwrap_or(0), is_control);
        WIND_UD_POS.write(buf, self.wind_ud_pos.unwrap_or(0), is_control);
        WIND_LR_AUTO.write(buf, self.wind_lr_auto.unwrap_or(0), is_control);
        WIND_LR_POS.write(buf, self.wind_lr_pos.unwrap_or(0), is_control);
    }
}

fn error_code(byte: u8) -> String {
    let code = byte & 0x7f;
    if code == 0 {
        "00".to_string()
    } else if byte & 0x80 == 0 {
        format!("M{code:02}")
    } else {
        format!("E{code}")
    }
}

/// Locate the status chunk inside a decoded `airconStat` blob
///
/// Byte 18 holds a count of 4-byte records preceding the chunk.
pub fn extract_status_chunk(blob: &[u8]) -> Result<&[u8], GatewayError> {
    let records = *blob.get(18).ok_or_else(|| {
        GatewayError::decode(format!("status blob too short ({} bytes)", blob.len()))
    })?;

    let offset = usize::from(records) * 4 + 21;
    blob.get(offset..offset + STATUS_LEN).ok_or_else(|| {
        GatewayError::decode(format!(
            "status chunk at {offset} exceeds blob of {} bytes",
            blob.len()
        ))
    })
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &byte in data {
        for bit in (0..8).rev() {
            let data_bit = (byte >> bit) & 1 == 1;
            let top_bit = crc & 0x8000 != 0;
            crc <<= 1;
            if data_bit != top_bit {
                crc ^= 0x1021;
            }
        }
    }
    crc
}
