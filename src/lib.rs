//! Aircon Bridge - MQTT bridge for networked aircon inverters
//!
//! Polls a fixed set of aircon units over their local HTTP API, publishes
//! every attribute to an MQTT broker and applies commands received on
//! `<prefix>/<name>/<attribute>/set` topics.
//!
//! # Overview
//!
//! - [`protocol`] - Attributes, topic layout and command validation
//! - [`gateway`] - Query/apply seam and the aircon HTTP gateway with its frame codec
//! - [`transport`] - Broker transport trait and the rumqttc-based MQTT client
//! - [`session`] - Subscribe-and-advertise on connect, reconnect backoff
//! - [`poll_loop`] / [`dispatcher`] - The two concurrent activities of the bridge
//! - [`bridge`] - Wiring and lifecycle
//!
//! # Quick Start
//!
//! ```rust
//! use aircon_bridge::protocol::{Command, CommandAttribute, TopicBuilder};
//!
//! let topics = TopicBuilder::new("klima/");
//! assert_eq!(topics.command_filter(), "klima/+/+/set");
//!
//! let command = Command::from_message(&topics, "klima/Lounge/airflow/set", b"2").unwrap();
//! assert_eq!(command.device_name, "Lounge");
//! assert_eq!(command.attribute, CommandAttribute::Airflow);
//!
//! let update = command.validate().unwrap();
//! assert_eq!(update.airflow, Some(2));
//! assert_eq!(update.power, None);
//! ```

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod poll_loop;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod testing;
pub mod transport;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
