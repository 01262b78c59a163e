//! Periodic polling of every configured unit
//!
//! One iteration walks the registry in order: republish the device identity,
//! query the unit under its I/O lock, publish the seven attributes. A
//! recoverable gateway failure costs the device its turn plus half an
//! interval of cooldown; an unrecoverable one ends the loop with an error.

use crate::gateway::{with_timeout, DeviceGateway, GatewayError};
use crate::protocol::AttributeSet;
use crate::registry::{Device, DeviceRegistry};
use crate::session::{BrokerSession, ReconnectOutcome};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Counters for one pass over the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub polled: usize,
    pub failed: usize,
    /// Iteration ended early because shutdown was requested
    pub interrupted: bool,
}

/// Sleep for `duration` unless shutdown is signalled first
///
/// Returns false if shutdown was requested. A closed shutdown channel
/// can no longer signal, so the full duration is slept.
pub async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    (&mut sleep).await;
                    return true;
                }
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received during sleep");
                    return false;
                }
            }
        }
    }
}

/// Poll loop driving the broker session and the gateway
pub struct PollLoop<T: Transport, G: DeviceGateway> {
    session: BrokerSession<T>,
    gateway: Arc<G>,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    device_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T: Transport, G: DeviceGateway> PollLoop<T, G> {
    pub fn new(
        session: BrokerSession<T>,
        gateway: Arc<G>,
        registry: Arc<DeviceRegistry>,
        interval: Duration,
        device_timeout: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            gateway,
            registry,
            interval,
            device_timeout,
            shutdown_rx,
        }
    }

    pub fn session(&self) -> &BrokerSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut BrokerSession<T> {
        &mut self.session
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run until shutdown or an unrecoverable gateway error
    pub async fn run(&mut self) -> Result<(), GatewayError> {
        info!(
            devices = self.registry.len(),
            interval = ?self.interval,
            "Starting poll loop"
        );

        while !self.shutdown_requested() {
            match self.session.reconnect_if_pending().await {
                ReconnectOutcome::Reconnected => info!("Broker session restored"),
                ReconnectOutcome::Failed { attempt } => {
                    debug!(attempt, "Broker still unreachable, polling anyway")
                }
                ReconnectOutcome::Deferred { .. } | ReconnectOutcome::NotNeeded => {}
            }

            let report = self.run_iteration().await?;
            debug!(
                polled = report.polled,
                failed = report.failed,
                "Poll iteration finished"
            );
            if report.interrupted {
                break;
            }

            if !interruptible_sleep(&mut self.shutdown_rx, self.interval).await {
                break;
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }

    /// One pass over the registry
    pub async fn run_iteration(&mut self) -> Result<IterationReport, GatewayError> {
        let mut report = IterationReport::default();
        let registry = Arc::clone(&self.registry);

        for device in registry.iter() {
            if self.shutdown_requested() {
                report.interrupted = true;
                break;
            }

            self.session.publish_identity(&device.name).await;

            let span = crate::device_span!(op = "query", device = %device.name, address = %device.address);
            match self.poll_device(device).instrument(span).await {
                Ok(state) => {
                    device.record_state(state.clone()).await;
                    self.session.publish_state(&device.name, &state).await;
                    report.polled += 1;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(device = %device.name, "Polling failed, skipping device: {}", e);
                    report.failed += 1;
                    if !interruptible_sleep(&mut self.shutdown_rx, self.interval / 2).await {
                        report.interrupted = true;
                        break;
                    }
                }
                Err(e) => {
                    error!(device = %device.name, "Unrecoverable gateway error: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    async fn poll_device(&self, device: &Device) -> Result<AttributeSet, GatewayError> {
        let _io = device.lock_io().await;
        let state = with_timeout(self.device_timeout, self.gateway.query(&device.address)).await?;
        debug!(state = ?state, "Polled device");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_completes() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(interruptible_sleep(&mut rx, Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move {
            interruptible_sleep(&mut rx, Duration::from_secs(3600)).await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_after_shutdown_returns_immediately() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(!interruptible_sleep(&mut rx, Duration::from_secs(3600)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_with_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let start = tokio::time::Instant::now();
        assert!(interruptible_sleep(&mut rx, Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
