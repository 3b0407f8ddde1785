// Local file-system archive client
// Persists a finished job's descriptor under a directory tree keyed by
// cluster, job id and start time.

use async_trait::async_trait;
use jobstore_core::domain::{Job, JobStatistics, Metadata};
use jobstore_core::port::{ArchiveClient, ArchiveContext, ArchiveError, ArchivedJob};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const META_FILE: &str = "meta.json";

/// Archive root layout: `<root>/<cluster>/<job_id / 1000>/<job_id % 1000>/<start_time>/meta.json`
pub struct LocalArchiveClient {
    root: PathBuf,
}

#[derive(Serialize)]
struct ArchivedMeta<'a> {
    #[serde(flatten)]
    job: &'a Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta_data: Option<&'a Metadata>,
    statistics: &'a HashMap<String, JobStatistics>,
}

impl LocalArchiveClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one job's archive files
    pub fn job_dir(&self, job: &Job) -> PathBuf {
        self.root
            .join(&job.cluster)
            .join((job.job_id / 1000).to_string())
            .join(format!("{:03}", job.job_id % 1000))
            .join(job.start_time.to_string())
    }

    fn check(ctx: &ArchiveContext) -> Result<(), ArchiveError> {
        if ctx.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveClient for LocalArchiveClient {
    async fn archive_job(
        &self,
        job: &Job,
        ctx: ArchiveContext,
    ) -> Result<ArchivedJob, ArchiveError> {
        Self::check(&ctx)?;

        // no metric source behind a local archive
        let statistics = HashMap::new();
        let meta = ArchivedMeta {
            job,
            meta_data: job.meta_data.as_deref(),
            statistics: &statistics,
        };
        let body = serde_json::to_vec_pretty(&meta)
            .map_err(|e| ArchiveError::Backend(format!("encoding {}: {}", META_FILE, e)))?;

        let dir = self.job_dir(job);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ArchiveError::Io(format!("{}: {}", dir.display(), e)))?;
        debug!(job_id = job.id, dir = %dir.display(), "Archive directory ready");

        Self::check(&ctx)?;

        let path = dir.join(META_FILE);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ArchiveError::Io(format!("{}: {}", path.display(), e)))?;

        info!(job_id = job.id, path = %path.display(), "Job archived to local storage");
        Ok(ArchivedJob {
            job_id: job.id,
            statistics,
        })
    }
}
