//! Attribute model, topic layout and command validation
//!
//! This module defines what the bridge publishes and accepts on the broker,
//! independent of the MQTT client and the device gateway.

pub mod attributes;
pub mod command;
pub mod topics;

pub use attributes::*;
pub use command::*;
pub use topics::*;
