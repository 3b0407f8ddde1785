// Job Repository Port (Interface)

use crate::domain::{
    Aggregate, Job, JobFilter, JobId, JobState, JobStatistics, JobsStatistics, Metadata,
    MonitoringStatus, NewJob, OrderBy, PageRequest, RequestContext, SearchTarget, TagId, User,
    Weight,
};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Allowed (table, select column, where column) combinations for the generic
/// column lookups. Identifiers are never taken from caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnLookup {
    /// job.user where job.user matches
    JobUser,
    /// job.project where job.project matches
    JobProject,
    /// user.username where user.name matches
    UsernameByName,
    /// user.name where user.username matches
    NameByUsername,
}

/// subcluster -> hostname -> number of running jobs on that host
pub type AllocatedNodes = HashMap<String, HashMap<String, i64>>;

/// Repository interface for Job persistence, search and aggregation
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Find a job by scheduler job id; cluster and start time narrow collisions.
    /// Returns `AppError::NotFound` when nothing matches.
    async fn find(&self, job_id: i64, cluster: Option<&str>, start_time: Option<i64>)
        -> Result<Job>;

    /// All jobs with this scheduler job id
    async fn find_all(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Vec<Job>>;

    /// Find job by internal id
    async fn find_by_id(&self, id: JobId) -> Result<Job>;

    /// Insert a new job, returning its internal id
    async fn start(&self, job: &NewJob) -> Result<JobId>;

    /// Move a job to a terminal state (prior state is not checked)
    async fn stop(
        &self,
        id: JobId,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()>;

    async fn update_monitoring_status(&self, id: JobId, status: MonitoringStatus) -> Result<()>;

    /// Set monitoring status and the summary column of every known metric
    async fn mark_archived(
        &self,
        id: JobId,
        status: MonitoringStatus,
        statistics: &HashMap<String, JobStatistics>,
    ) -> Result<()>;

    /// Delete all jobs started before `start_time`, returning how many went
    async fn delete_jobs_before(&self, start_time: i64) -> Result<u64>;

    async fn delete_job_by_id(&self, id: JobId) -> Result<()>;

    /// Security-checked listing
    async fn query_jobs(
        &self,
        ctx: &RequestContext,
        filters: &[JobFilter],
        order: Option<OrderBy>,
        page: Option<PageRequest>,
    ) -> Result<Vec<Job>>;

    async fn count_jobs(&self, ctx: &RequestContext, filters: &[JobFilter]) -> Result<i64>;

    /// group -> count (or weighted sum), ordered by count, optionally limited
    async fn count_grouped_jobs(
        &self,
        ctx: &RequestContext,
        aggregate: Aggregate,
        filters: &[JobFilter],
        weight: Option<Weight>,
        limit: Option<u32>,
    ) -> Result<HashMap<String, i64>>;

    async fn jobs_statistics(
        &self,
        ctx: &RequestContext,
        filters: &[JobFilter],
        group_by: Option<Aggregate>,
    ) -> Result<Vec<JobsStatistics>>;

    /// Hosts with zero running jobs are absent
    async fn allocated_nodes(&self, cluster: &str) -> Result<AllocatedNodes>;

    /// Fail running jobs whose walltime is exceeded by more than `grace_secs`
    async fn stop_jobs_exceeding_walltime_by(&self, grace_secs: i64) -> Result<u64>;

    async fn find_user_or_project_or_jobname(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<SearchTarget>;

    async fn find_column_value(
        &self,
        user: Option<&User>,
        term: &str,
        lookup: ColumnLookup,
        is_like: bool,
    ) -> Result<String>;

    async fn find_column_values(
        &self,
        user: Option<&User>,
        term: &str,
        lookup: ColumnLookup,
    ) -> Result<Vec<String>>;

    /// Distinct partitions of a cluster (cached)
    async fn partitions(&self, cluster: &str) -> Result<Arc<Vec<String>>>;

    /// Load metadata through the result cache; `None` if the job has none or
    /// the stored blob cannot be decoded.
    async fn fetch_metadata(&self, job: &mut Job) -> Result<Option<Arc<Metadata>>>;

    async fn fetch_job_name(&self, job: &mut Job) -> Result<Option<String>>;

    /// Merge one key into the job's metadata and persist it
    async fn update_metadata(&self, job: &mut Job, key: &str, value: &str) -> Result<()>;

    async fn create_tag(&self, tag_type: &str, tag_name: &str) -> Result<TagId>;

    async fn add_tag(&self, id: JobId, tag: TagId) -> Result<()>;
}
