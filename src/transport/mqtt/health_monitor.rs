//! Pure health monitoring and reconnection logic for MQTT client
//!
//! This module contains pure functions for session state transitions and
//! reconnection decision making. Nothing here performs I/O.

use super::connection::{DisconnectReason, ReconnectConfig, SessionState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(current: SessionState, event: &ConnectionEvent) -> SessionState {
        let next = match event {
            ConnectionEvent::ConnAckReceived => {
                info!("MQTT client connected successfully");
                SessionState {
                    connected: true,
                    reconnect_pending: false,
                }
            }
            ConnectionEvent::Disconnected(reason) if reason.is_unexpected() => {
                warn!(reason = %reason, "MQTT connection lost, reconnect scheduled");
                SessionState {
                    connected: false,
                    reconnect_pending: true,
                }
            }
            ConnectionEvent::Disconnected(reason) => {
                info!(reason = %reason, "MQTT connection closed normally");
                SessionState {
                    connected: false,
                    reconnect_pending: false,
                }
            }
            ConnectionEvent::ConnectFailed(error) => {
                warn!(error = %error, "MQTT connection attempt failed");
                SessionState {
                    connected: false,
                    reconnect_pending: true,
                }
            }
        };

        if next != current {
            debug!(from = ?current, to = ?next, "MQTT session state changed");
        }
        next
    }

    /// Decide whether a reconnect attempt may run now (pure function)
    ///
    /// The first attempt after a disconnect runs immediately; after `n`
    /// consecutive failures the next attempt waits for the backoff delay
    /// measured from the last failure.
    pub fn should_attempt_reconnection(
        state: SessionState,
        tracker: &ReconnectTracker,
        config: &ReconnectConfig,
        now: Instant,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if !state.needs_reconnect() {
            return ReconnectionDecision::NotNeeded;
        }

        let attempt = tracker.failures + 1;
        let Some(last_failure) = tracker.last_failure else {
            return ReconnectionDecision::Proceed { attempt };
        };

        let delay = config.delay_after_failures(tracker.failures);
        let elapsed = now.saturating_duration_since(last_failure);
        if elapsed >= delay {
            ReconnectionDecision::Proceed { attempt }
        } else {
            ReconnectionDecision::Wait {
                remaining: delay - elapsed,
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt number `attempt`
    Proceed { attempt: u32 },
    /// Backoff has not elapsed yet
    Wait { remaining: Duration },
    /// Connected, or the last disconnect was normal
    NotNeeded,
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Connection ended, by the broker, the network or ourselves
    Disconnected(DisconnectReason),
    /// Connect or reconnect attempt did not produce a ConnAck
    ConnectFailed(String),
}

/// Consecutive failed connection attempts since the last success
#[derive(Debug, Clone, Default)]
pub struct ReconnectTracker {
    pub failures: u32,
    pub last_failure: Option<Instant>,
}

impl ReconnectTracker {
    pub fn record_failure(&mut self, at: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(at);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }
}
