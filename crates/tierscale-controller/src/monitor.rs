//! Monitoring driver: periodic automatic scaling.
//!
//! Each tick runs one evaluate-and-apply cycle through the controller.
//! Ticks are skipped while the controller is in manual mode or a
//! transition is already running. A failed cycle is logged and the loop
//! keeps going. Stopping the driver prevents new ticks but lets a tick
//! that already started run to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tierscale_core::{ConfigError, ScalingMode, ScalingRecord};

use crate::controller::{AutoScaleOutcome, Controller};
use crate::error::ControllerError;

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ManualMode,
    ScalingInProgress,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// Evaluated, nothing to do.
    Idle,
    Scaled(ScalingRecord),
    /// The cycle failed. The message is what was logged.
    Failed(String),
}

/// Periodic driver for automatic scaling.
pub struct Monitor {
    controller: Arc<Controller>,
    interval: Duration,
}

impl Monitor {
    pub fn new(controller: Arc<Controller>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Use the interval from the controller's configuration.
    pub fn from_config(controller: Arc<Controller>) -> Result<Self, ConfigError> {
        let interval = controller.config().interval()?;
        Ok(Self::new(controller, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle. Never returns an error; failures are folded into
    /// [`TickOutcome::Failed`].
    pub async fn tick(&self) -> TickOutcome {
        if self.controller.mode().await != ScalingMode::Auto {
            debug!("monitor tick skipped, manual mode");
            return TickOutcome::Skipped(SkipReason::ManualMode);
        }
        if self.controller.is_scaling() {
            debug!("monitor tick skipped, scaling in progress");
            return TickOutcome::Skipped(SkipReason::ScalingInProgress);
        }

        match self.controller.execute_auto_scaling().await {
            Ok(AutoScaleOutcome::NotNeeded(_)) => TickOutcome::Idle,
            Ok(AutoScaleOutcome::Scaled { outcome, .. }) => TickOutcome::Scaled(outcome.record),
            Err(ControllerError::AlreadyScaling) => {
                TickOutcome::Skipped(SkipReason::ScalingInProgress)
            }
            Err(e) => {
                error!(error = %e, "automatic scaling cycle failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    /// Tick every interval until `shutdown` changes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "tier monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("tier monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        MonitorHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a spawned [`Monitor`].
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "tier monitor task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
