// Maintenance Service
// Periodic walltime enforcement and retention cleanup

use super::shutdown::ShutdownToken;
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often the maintenance pass runs
    pub interval: Duration,
    /// Seconds a running job may exceed its walltime before it is failed
    pub walltime_grace_secs: i64,
    /// Delete jobs started more than this many days ago; `None` keeps everything
    pub retention_days: Option<i64>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            walltime_grace_secs: 300,
            retention_days: None,
        }
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub stopped_jobs: u64,
    pub deleted_jobs: u64,
}

/// Maintenance scheduler
///
/// Runs periodic maintenance operations in the background
pub struct MaintenanceScheduler {
    repo: Arc<dyn JobRepository>,
    time: Arc<dyn TimeProvider>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        time: Arc<dyn TimeProvider>,
        config: MaintenanceConfig,
    ) -> Self {
        Self { repo, time, config }
    }

    /// Run maintenance loop (background task)
    ///
    /// Should be spawned in tokio::spawn. A failed pass is logged and the
    /// loop waits for the next tick.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            walltime_grace_secs = self.config.walltime_grace_secs,
            retention_days = self.config.retention_days,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.run_once().await {
                Ok(report) => {
                    info!(
                        stopped_jobs = report.stopped_jobs,
                        deleted_jobs = report.deleted_jobs,
                        "Scheduled maintenance completed"
                    );
                }
                Err(e) => {
                    error!(error = ?e, "Scheduled maintenance failed");
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run one pass immediately
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let stopped_jobs = self
            .repo
            .stop_jobs_exceeding_walltime_by(self.config.walltime_grace_secs)
            .await?;

        let deleted_jobs = match self.config.retention_days {
            Some(days) => {
                let cutoff = self.time.now_secs() - days * SECONDS_PER_DAY;
                self.repo.delete_jobs_before(cutoff).await?
            }
            None => 0,
        };

        Ok(MaintenanceReport {
            stopped_jobs,
            deleted_jobs,
        })
    }
}
