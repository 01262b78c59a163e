//! Observability for the aircon bridge
//!
//! Structured logging to the console and, optionally, a rotated log file.

pub mod logging;

pub use logging::{init_logging, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{device_span, mqtt_span};
