use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use thiserror::Error as ThisError;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{Instrument as _, debug, info, warn};

use super::Checker;
use crate::trigger::TriggerSender;

/// Lifecycle of a [`HealthMonitor`]. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub phase: MonitorPhase,
    pub healthy: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum MonitorError {
    #[error("monitor for {0} was already started")]
    AlreadyStarted(String),
}

/// Probes one target on a fixed tick and fires the renewal trigger once the
/// consecutive failure threshold is reached.
///
/// A monitor runs at most once; build a new one for the next target.
pub struct HealthMonitor {
    checker: Arc<dyn Checker>,
    tick: Duration,
    threshold: u32,
    trigger: TriggerSender,
    started: AtomicBool,
    stop_tx: watch::Sender<bool>,
    status_tx: watch::Sender<MonitorStatus>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        checker: Arc<dyn Checker>,
        tick: Duration,
        threshold: u32,
        trigger: TriggerSender,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(MonitorStatus {
            phase: MonitorPhase::Idle,
            healthy: false,
            consecutive_failures: 0,
        });
        Self {
            checker,
            tick,
            threshold: threshold.max(1),
            trigger,
            started: AtomicBool::new(false),
            stop_tx,
            status_tx,
        }
    }

    pub fn target(&self) -> &str {
        self.checker.target_description()
    }

    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        *self.status_tx.borrow()
    }

    /// Observe status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    /// Spawn the probe loop.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyStarted`] on any call after the first.
    pub fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(MonitorError::AlreadyStarted(self.target().to_string()));
        }
        if *self.stop_tx.borrow() {
            // Stopped before it ever ran.
            self.set_phase(MonitorPhase::Stopped);
            return Ok(());
        }
        self.set_phase(MonitorPhase::Running);
        let monitor = self.clone();
        let span = tracing::info_span!("monitor", probe = %self.target());
        tokio::spawn(async move { monitor.run().await }.instrument(span));
        Ok(())
    }

    /// Request termination. Returns immediately; repeated calls and calls on a
    /// finished monitor do nothing.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.status_tx.send_if_modified(|status| {
            if status.phase == MonitorPhase::Idle {
                status.phase = MonitorPhase::Stopped;
                true
            } else {
                false
            }
        });
    }

    fn set_phase(&self, phase: MonitorPhase) {
        self.status_tx.send_modify(|status| status.phase = phase);
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.wait_for(|stopped| *stopped) => break,
                _ = ticker.tick() => {}
            }

            // The probe runs to completion; the next tick waits for it.
            let result = self.checker.check().await;
            if *stop_rx.borrow() {
                break;
            }

            let mut breached = false;
            self.status_tx.send_modify(|status| match result {
                Ok(()) => {
                    if !status.healthy {
                        info!("Target healthy");
                    }
                    status.healthy = true;
                    status.consecutive_failures = 0;
                }
                Err(ref e) => {
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    debug!(failures = status.consecutive_failures, "Probe failed: {e}");
                    if status.consecutive_failures >= self.threshold {
                        status.healthy = false;
                        status.phase = MonitorPhase::Failed;
                        breached = true;
                    }
                }
            });

            if breached {
                warn!(threshold = self.threshold, "Failure threshold reached, requesting renewal");
                tokio::select! {
                    res = self.trigger.fire(self.target()) => {
                        if let Err(e) = res {
                            warn!("Renewal trigger not delivered: {e}");
                        }
                    }
                    _ = stop_rx.wait_for(|stopped| *stopped) => {
                        debug!("Stopped while waiting to deliver the renewal trigger");
                    }
                }
                return;
            }
        }

        self.set_phase(MonitorPhase::Stopped);
        debug!("Monitor stopped");
    }
}
