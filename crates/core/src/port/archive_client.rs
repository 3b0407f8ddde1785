// Archive Client Port
// Abstraction over the metric backend that moves a finished job's time series
// into long-term storage and reports per-metric summary statistics.

use crate::application::ShutdownToken;
use crate::domain::{Job, JobId, JobStatistics};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

/// Result of archiving one job
#[derive(Debug, Clone, Default)]
pub struct ArchivedJob {
    pub job_id: JobId,
    /// metric name -> {avg, min, max}
    pub statistics: HashMap<String, JobStatistics>,
}

/// Execution context handed to the archive client
#[derive(Clone)]
pub struct ArchiveContext {
    /// Point in time after which the worker stops waiting for the client
    pub deadline: Option<Instant>,
    /// Fires when the archiving worker is shutting down
    pub shutdown: ShutdownToken,
}

impl ArchiveContext {
    pub fn new(deadline: Option<Instant>, shutdown: ShutdownToken) -> Self {
        Self { deadline, shutdown }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_shutdown()
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }
}

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Metric data unavailable: {0}")]
    MetricData(String),

    #[error("Archive backend failed: {0}")]
    Backend(String),

    #[error("Archiving timed out after {0}s")]
    Timeout(u64),

    #[error("Archiving cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Pull the job's full metric time series, persist it to the archive
    /// backend and return per-metric summary statistics.
    ///
    /// # Errors
    /// - ArchiveError::MetricData if the metric source cannot deliver the data
    /// - ArchiveError::Backend if the archive backend rejects the write
    async fn archive_job(&self, job: &Job, ctx: ArchiveContext)
        -> Result<ArchivedJob, ArchiveError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock client behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with the given statistics
        Success(HashMap<String, JobStatistics>),
        /// Always fail with message
        Fail(String),
        /// Sleep before succeeding (for timeout and serialization tests)
        Delay(Duration),
    }

    /// Mock Archive Client for testing
    pub struct MockArchiveClient {
        behavior: Arc<Mutex<MockBehavior>>,
        failing_jobs: Arc<Mutex<HashSet<JobId>>>,
        processed: Arc<Mutex<Vec<JobId>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockArchiveClient {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                failing_jobs: Arc::new(Mutex::new(HashSet::new())),
                processed: Arc::new(Mutex::new(Vec::new())),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success(HashMap::new()))
        }

        pub fn with_statistics(stats: HashMap<String, JobStatistics>) -> Self {
            Self::new(MockBehavior::Success(stats))
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_delay(delay: Duration) -> Self {
            Self::new(MockBehavior::Delay(delay))
        }

        /// Fail only for this job, regardless of behavior
        pub fn fail_for(&self, id: JobId) {
            self.failing_jobs.lock().unwrap().insert(id);
        }

        pub fn call_count(&self) -> usize {
            self.processed.lock().unwrap().len()
        }

        pub fn processed(&self) -> Vec<JobId> {
            self.processed.lock().unwrap().clone()
        }

        /// Highest number of simultaneous archive calls observed
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        /// Archive calls currently running
        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArchiveClient for MockArchiveClient {
        async fn archive_job(
            &self,
            job: &Job,
            _ctx: ArchiveContext,
        ) -> Result<ArchivedJob, ArchiveError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            // released on completion and when the caller drops the call
            let _in_flight = InFlight(&self.in_flight);
            self.processed.lock().unwrap().push(job.id);

            let behavior = self.behavior.lock().unwrap().clone();
            let fails = self.failing_jobs.lock().unwrap().contains(&job.id);

            let result = match behavior {
                _ if fails => Err(ArchiveError::MetricData(format!(
                    "no data for job {}",
                    job.id
                ))),
                MockBehavior::Success(statistics) => Ok(ArchivedJob {
                    job_id: job.id,
                    statistics,
                }),
                MockBehavior::Fail(msg) => Err(ArchiveError::Backend(msg)),
                MockBehavior::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(ArchivedJob {
                        job_id: job.id,
                        statistics: HashMap::new(),
                    })
                }
            };

            result
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
