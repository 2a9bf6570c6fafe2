//! Fires scans on a fixed interval and on demand.

use crate::coordinator::{ScanCoordinator, ScanState};
use crate::shutdown::StopFlag;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduled scans.
    pub interval: Duration,
    /// Wait before the first scan after start-up.
    pub startup_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// Handle for requesting a scan outside the schedule.
#[derive(Clone)]
pub struct ScanTrigger {
    tx: mpsc::Sender<()>,
    coordinator: Arc<ScanCoordinator>,
}

impl ScanTrigger {
    /// Ask for a scan. Returns `false` when one is already running.
    pub fn trigger(&self) -> bool {
        if self.coordinator.state() == ScanState::Scanning {
            return false;
        }

        match self.tx.try_send(()) {
            Ok(()) => true,
            // A request is already waiting to be picked up
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.coordinator.state() == ScanState::Scanning
    }
}

pub struct Scheduler {
    coordinator: Arc<ScanCoordinator>,
    config: SchedulerConfig,
    stop: StopFlag,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<ScanCoordinator>, config: SchedulerConfig, stop: StopFlag) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            coordinator,
            config,
            stop,
            trigger_tx,
            trigger_rx,
        }
    }

    pub fn trigger_handle(&self) -> ScanTrigger {
        ScanTrigger {
            tx: self.trigger_tx.clone(),
            coordinator: Arc::clone(&self.coordinator),
        }
    }

    /// Run until the stop flag is set.
    pub async fn run(mut self) {
        info!(
            "Scheduler started, scanning every {:?} (first scan in {:?})",
            self.config.interval, self.config.startup_delay
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = self.stop.stopped() => {
                info!("Scheduler stopped before the first scan");
                return;
            }
        }

        self.coordinator.run_scan().await;

        let mut interval =
            tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.stopped() => break,
                _ = interval.tick() => {
                    info!("Scheduled scan starting");
                }
                Some(()) = self.trigger_rx.recv() => {
                    info!("Manual scan requested");
                }
            }

            if self.stop.is_stopped() {
                break;
            }

            let outcome = self.coordinator.run_scan().await;
            debug!("Scan finished: {:?}", outcome);
        }

        info!("Scheduler stopped");
    }
}
