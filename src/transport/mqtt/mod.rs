//! MQTT client implementation for the aircon bridge
//!
//! This module provides a decomposed MQTT client that separates pure
//! functions from I/O operations for better testability.
//!
//! # Architecture
//!
//! - [`connection`] - Session state, reconnect backoff and option building
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`health_monitor`] - Pure state transitions and reconnection decisions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use aircon_bridge::config::MqttSection;
//! use aircon_bridge::transport::mqtt::MqttClient;
//! use aircon_bridge::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     client_id: "aircon-bridge".to_string(),
//!     keep_alive_secs: 60,
//!     connect_timeout_secs: 10,
//! };
//!
//! let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::channel(64);
//! let client = MqttClient::new(&config, inbound_tx)?;
//! client.connect().await?;
//! client.subscribe("klima/+/+/set").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{DisconnectReason, MqttError, ReconnectConfig, SessionState};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectTracker, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
