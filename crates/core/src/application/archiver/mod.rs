// Archiving Worker
// Moves finished jobs to long-term storage, one at a time, off the request path.

use super::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::{Job, JobId, MonitoringStatus};
use crate::error::{AppError, Result};
use crate::port::{ArchiveClient, ArchiveContext, ArchiveError, JobRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default number of queued archive tasks before producers wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default upper bound for one archive client call (5 minutes)
pub const DEFAULT_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub queue_capacity: usize,
    /// `None` waits for the archive client indefinitely
    pub timeout: Option<Duration>,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout: Some(DEFAULT_ARCHIVE_TIMEOUT),
        }
    }
}

/// A job waiting to be archived
struct ArchiveTask {
    job: Job,
    enqueued_at: Instant,
}

/// Handle to the archiving pipeline.
///
/// Producers call `trigger_archiving` from request tasks; a single consumer
/// task drains the queue so archive calls never overlap.
pub struct Archiver {
    tx: mpsc::Sender<ArchiveTask>,
    pending: Arc<watch::Sender<usize>>,
    accepting: AtomicBool,
    shutdown: ShutdownSender,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Archiver {
    /// Start the consumer task on the current runtime
    pub fn spawn(
        repo: Arc<dyn JobRepository>,
        client: Arc<dyn ArchiveClient>,
        config: ArchiverConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let (shutdown, token) = shutdown_channel();

        let worker = Arc::new(ArchiveWorker {
            repo,
            client,
            timeout: config.timeout,
            shutdown: token.clone(),
        });

        info!(
            queue_capacity = config.queue_capacity,
            timeout_secs = config.timeout.map(|t| t.as_secs()),
            "Archiving worker started"
        );

        let consumer = tokio::spawn(consume(rx, worker, Arc::clone(&pending), token));

        Self {
            tx,
            pending,
            accepting: AtomicBool::new(true),
            shutdown,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Queue a job for archiving. Waits while the queue is full.
    ///
    /// # Errors
    /// - AppError::InvalidState once shutdown has begun
    pub async fn trigger_archiving(&self, job: Job) -> Result<()> {
        self.pending.send_modify(|n| *n += 1);

        if !self.accepting.load(Ordering::SeqCst) {
            self.release();
            return Err(AppError::InvalidState(format!(
                "archiver is shutting down, job {} not queued",
                job.id
            )));
        }

        let id = job.id;
        let task = ArchiveTask {
            job,
            enqueued_at: Instant::now(),
        };
        if self.tx.send(task).await.is_err() {
            self.release();
            return Err(AppError::InvalidState(format!(
                "archive queue closed, job {} not queued",
                id
            )));
        }
        Ok(())
    }

    /// Resolve once every queued job has reached a terminal status
    pub async fn wait_for_archiving(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Jobs queued or in progress
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Stop accepting, drain the queue, then stop and join the consumer
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(pending = self.pending(), "Archiving worker draining");

        self.wait_for_archiving().await;
        self.shutdown.shutdown();

        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                error!(error = ?e, "Archiving worker task failed");
            }
        }
        info!("Archiving worker stopped");
    }

    fn release(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn consume(
    mut rx: mpsc::Receiver<ArchiveTask>,
    worker: Arc<ArchiveWorker>,
    pending: Arc<watch::Sender<usize>>,
    mut shutdown: ShutdownToken,
) {
    loop {
        let task = tokio::select! {
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
            _ = shutdown.wait() => break,
        };

        let id = task.job.id;

        // Panic isolation: a misbehaving client must not take the consumer down
        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.process(task).await })
        };
        if let Err(join_err) = handle.await {
            error!(job_id = id, error = ?join_err, "Archiving task panicked");
            worker.mark_failed(id).await;
        }

        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct ArchiveWorker {
    repo: Arc<dyn JobRepository>,
    client: Arc<dyn ArchiveClient>,
    timeout: Option<Duration>,
    shutdown: ShutdownToken,
}

impl ArchiveWorker {
    async fn process(&self, task: ArchiveTask) {
        let mut job = task.job;
        let id = job.id;
        info!(
            job_id = id,
            cluster = %job.cluster,
            queued_ms = task.enqueued_at.elapsed().as_millis() as u64,
            "Archiving job"
        );

        match self.archive(&mut job).await {
            Ok(()) => info!(job_id = id, "Job archived"),
            Err(e) => {
                error!(job_id = id, error = %e, "Archiving job failed");
                self.mark_failed(id).await;
            }
        }
    }

    async fn archive(&self, job: &mut Job) -> Result<()> {
        self.repo.fetch_metadata(job).await?;

        let deadline = self.timeout.map(|limit| Instant::now() + limit);
        let ctx = ArchiveContext::new(deadline, self.shutdown.clone());

        let archived = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.archive_job(job, ctx))
                .await
                .map_err(|_| ArchiveError::Timeout(limit.as_secs()))??,
            None => self.client.archive_job(job, ctx).await?,
        };

        self.repo
            .mark_archived(
                job.id,
                MonitoringStatus::ArchivingSuccessful,
                &archived.statistics,
            )
            .await
    }

    async fn mark_failed(&self, id: JobId) {
        if let Err(e) = self
            .repo
            .update_monitoring_status(id, MonitoringStatus::ArchivingFailed)
            .await
        {
            warn!(job_id = id, error = %e, "Could not record archiving failure");
        }
    }
}
