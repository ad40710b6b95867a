//! Sweeper background worker.
//!
//! Runs a sweep on a periodic interval until shutdown is signaled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::Sweeper;

pub struct SweeperWorker {
    sweeper: Arc<Sweeper>,
    interval: Duration,
}

impl SweeperWorker {
    pub fn new(sweeper: Arc<Sweeper>, interval: Duration) -> Self {
        Self { sweeper, interval }
    }

    #[instrument(skip(self, shutdown), name = "sweeper_worker")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting sweeper worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Sweeper worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_sweep(&self) {
        match self.sweeper.sweep().await {
            Ok(report) => {
                if !report.findings.is_empty() || !report.escalated.is_empty() {
                    info!(
                        findings = report.findings.len(),
                        removed = report.records_removed,
                        escalated = report.escalated.len(),
                        "Sweep found drift"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Sweep failed");
            }
        }
    }
}
