//! Testing utilities and mock implementations
//!
//! Mocks for the broker transport and the device gateway, so the bridge can
//! be tested without an MQTT broker or real aircon units.

pub mod mocks;

pub use mocks::*;
