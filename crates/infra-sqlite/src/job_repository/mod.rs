// SQLite JobRepository Implementation

mod stats;

use crate::error::map_sqlx_error;
use crate::query_builder::{apply_filter, order_clause, SelectBuilder, JOB_COLUMNS};
use crate::security::{lookup_columns, require_elevated, security_check};
use crate::statement_cache::{Bind, Statement, StatementCache};
use async_trait::async_trait;
use jobstore_core::cache::{Computed, ResultCache};
use jobstore_core::domain::{
    Aggregate, Cluster, Job, JobFilter, JobId, JobState, JobStatistics, JobsStatistics, Metadata,
    MonitoringStatus, NewJob, OrderBy, PageRequest, RequestContext, SearchTarget, TagId, User,
    Weight,
};
use jobstore_core::error::{AppError, Result};
use jobstore_core::port::{
    AllocatedNodes, AuthorizationProvider, ColumnLookup, JobRepository, TimeProvider,
};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const METADATA_TTL: Duration = Duration::from_secs(24 * 3600);
const PARTITIONS_TTL: Duration = Duration::from_secs(3600);

fn metadata_key(id: JobId) -> String {
    format!("metadata:{}", id)
}

fn partitions_key(cluster: &str) -> String {
    format!("partitions:{}", cluster)
}

/// Deployment-specific knobs of the repository
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Jobs shorter than this many seconds count as short jobs
    pub short_running_jobs_duration: i64,
    /// Topology used for per-subcluster core-hour weighting
    pub clusters: Vec<Cluster>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            short_running_jobs_duration: 5 * 60,
            clusters: Vec::new(),
        }
    }
}

pub struct SqliteJobRepository {
    stmts: Arc<StatementCache>,
    cache: Arc<ResultCache>,
    auth: Arc<dyn AuthorizationProvider>,
    time_provider: Arc<dyn TimeProvider>,
    options: RepositoryOptions,
}

impl SqliteJobRepository {
    pub fn new(
        stmts: Arc<StatementCache>,
        cache: Arc<ResultCache>,
        auth: Arc<dyn AuthorizationProvider>,
        time_provider: Arc<dyn TimeProvider>,
        options: RepositoryOptions,
    ) -> Self {
        Self {
            stmts,
            cache,
            auth,
            time_provider,
            options,
        }
    }

    fn now(&self) -> i64 {
        self.time_provider.now_secs()
    }

    fn select_jobs() -> SelectBuilder {
        let mut query = SelectBuilder::from("job");
        query.column(JOB_COLUMNS);
        query
    }

    async fn fetch_jobs(&self, stmt: &Statement) -> Result<Vec<Job>> {
        let now = self.now();
        self.stmts
            .fetch_all_as::<JobRow>(stmt)
            .await?
            .into_iter()
            .map(|row| row.into_job(now))
            .collect()
    }

    async fn fetch_job(&self, stmt: &Statement) -> Result<Option<Job>> {
        match self.stmts.fetch_optional_as::<JobRow>(stmt).await? {
            Some(row) => Ok(Some(row.into_job(self.now())?)),
            None => Ok(None),
        }
    }

    /// Read and decode the raw metadata blob of one job
    async fn load_metadata(&self, id: JobId) -> Result<Computed<Metadata>> {
        let stmt = Statement::new("SELECT job.meta_data FROM job WHERE job.id = ?").bind(id);
        let row = self
            .stmts
            .fetch_optional(&stmt)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
        let raw: Option<String> = row.try_get(0).map_err(map_sqlx_error)?;

        match raw.filter(|raw| !raw.is_empty()) {
            Some(raw) => {
                let meta: Metadata = serde_json::from_str(&raw)?;
                Ok(Computed::new(meta, METADATA_TTL, raw.len()))
            }
            None => Ok(Computed::new(Metadata::new(), METADATA_TTL, 0)),
        }
    }

    async fn load_partitions(&self, cluster: &str) -> Result<Computed<Vec<String>>> {
        let stmt = Statement::new(
            "SELECT DISTINCT job.\"partition\" FROM job \
             WHERE job.cluster = ? AND job.\"partition\" IS NOT NULL ORDER BY 1",
        )
        .bind(cluster);
        let partitions = self
            .stmts
            .fetch_all(&stmt)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(0).map_err(map_sqlx_error))
            .collect::<Result<Vec<_>>>()?;
        Ok(Computed::new(partitions, PARTITIONS_TTL, 1))
    }

    /// `Ok(None)` when the search should move on to the next step
    async fn lookup_step(
        &self,
        user: &User,
        term: &str,
        lookup: ColumnLookup,
        is_like: bool,
    ) -> Result<Option<String>> {
        match self.find_column_value(Some(user), term, lookup, is_like).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn find(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Job> {
        let mut query = Self::select_jobs();
        query.and_where("job.job_id = ?", [Bind::Int(job_id)]);
        if let Some(cluster) = cluster {
            query.and_where("job.cluster = ?", [Bind::from(cluster)]);
        }
        if let Some(start_time) = start_time {
            query.and_where("job.start_time = ?", [Bind::Int(start_time)]);
        }
        query.limit(1);

        self.fetch_job(&query.build())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    async fn find_all(
        &self,
        job_id: i64,
        cluster: Option<&str>,
        start_time: Option<i64>,
    ) -> Result<Vec<Job>> {
        let started = Instant::now();
        let mut query = Self::select_jobs();
        query.and_where("job.job_id = ?", [Bind::Int(job_id)]);
        if let Some(cluster) = cluster {
            query.and_where("job.cluster = ?", [Bind::from(cluster)]);
        }
        if let Some(start_time) = start_time {
            query.and_where("job.start_time = ?", [Bind::Int(start_time)]);
        }

        let jobs = self.fetch_jobs(&query.build()).await?;
        debug!(
            job_id,
            found = jobs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "find_all"
        );
        Ok(jobs)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Job> {
        let mut query = Self::select_jobs();
        query.and_where("job.id = ?", [Bind::Int(id)]);

        self.fetch_job(&query.build())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job with id {}", id)))
    }

    async fn start(&self, job: &NewJob) -> Result<JobId> {
        let resources = serde_json::to_string(&job.resources)?;
        let meta_data = serde_json::to_string(&job.meta_data)?;

        let stmt = Statement::new(
            "INSERT INTO job (job_id, user, project, cluster, subcluster, \"partition\", \
             array_job_id, num_nodes, num_hwthreads, num_acc, \"exclusive\", monitoring_status, \
             smt, job_state, start_time, duration, walltime, resources, meta_data) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.job_id)
        .bind(job.user.as_str())
        .bind(job.project.as_str())
        .bind(job.cluster.as_str())
        .bind(job.subcluster.as_str())
        .bind(job.partition.clone())
        .bind(job.array_job_id)
        .bind(job.num_nodes)
        .bind(job.num_hwthreads)
        .bind(job.num_acc)
        .bind(job.exclusive)
        .bind(job.monitoring_status.code())
        .bind(job.smt)
        .bind(job.state.as_str())
        .bind(job.start_time)
        .bind(job.duration)
        .bind(job.walltime)
        .bind(resources)
        .bind(meta_data);

        let id = self.stmts.insert(&stmt).await?;
        self.cache.delete(&partitions_key(&job.cluster));

        info!(
            id,
            job_id = job.job_id,
            cluster = %job.cluster,
            user = %job.user,
            "Job started"
        );
        Ok(id)
    }

    async fn stop(
        &self,
        id: JobId,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()> {
        let stmt = Statement::new(
            "UPDATE job SET job_state = ?, duration = ?, monitoring_status = ? WHERE job.id = ?",
        )
        .bind(state.as_str())
        .bind(duration)
        .bind(monitoring_status.code())
        .bind(id);

        self.stmts.execute(&stmt).await?;
        debug!(id, state = %state, duration, "Job stopped");
        Ok(())
    }

    async fn update_monitoring_status(&self, id: JobId, status: MonitoringStatus) -> Result<()> {
        let stmt = Statement::new("UPDATE job SET monitoring_status = ? WHERE job.id = ?")
            .bind(status.code())
            .bind(id);
        self.stmts.execute(&stmt).await?;
        Ok(())
    }

    async fn mark_archived(
        &self,
        id: JobId,
        status: MonitoringStatus,
        statistics: &HashMap<String, JobStatistics>,
    ) -> Result<()> {
        let mut sets = vec!["monitoring_status = ?"];
        let mut binds = vec![Bind::from(status.code())];

        // sorted so equal metric sets share one statement text
        let mut metrics: Vec<_> = statistics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));

        for (metric, stats) in metrics {
            let (set, value) = match metric.as_str() {
                "flops_any" => ("flops_any_avg = ?", stats.avg),
                "mem_used" => ("mem_used_max = ?", stats.max),
                "mem_bw" => ("mem_bw_avg = ?", stats.avg),
                "net_bw" => ("net_bw_avg = ?", stats.avg),
                "file_bw" => ("file_bw_avg = ?", stats.avg),
                "load" => ("load_avg = ?", stats.avg),
                other => {
                    info!(id, metric = %other, "mark_archived: unknown metric ignored");
                    continue;
                }
            };
            sets.push(set);
            binds.push(Bind::Float(value));
        }
        binds.push(Bind::Int(id));

        let stmt = Statement {
            sql: format!("UPDATE job SET {} WHERE job.id = ?", sets.join(", ")),
            binds,
        };
        if let Err(e) = self.stmts.execute(&stmt).await {
            warn!(id, error = %e, "Error while marking job as archived");
            return Err(e);
        }
        Ok(())
    }

    async fn delete_jobs_before(&self, start_time: i64) -> Result<u64> {
        let count_stmt =
            Statement::new("SELECT COUNT(*) FROM job WHERE job.start_time < ?").bind(start_time);
        let delete_stmt =
            Statement::new("DELETE FROM job WHERE job.start_time < ?").bind(start_time);

        let mut tx = self.stmts.pool().begin().await.map_err(map_sqlx_error)?;
        let count: i64 = count_stmt
            .query()
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(map_sqlx_error)?;
        delete_stmt
            .query()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        info!(start_time, deleted = count, "Deleted jobs started before cutoff");
        Ok(count as u64)
    }

    async fn delete_job_by_id(&self, id: JobId) -> Result<()> {
        let deleted = self
            .stmts
            .execute(&Statement::new("DELETE FROM job WHERE job.id = ?").bind(id))
            .await?;
        self.cache.delete(&metadata_key(id));
        info!(id, deleted, "Deleted job");
        Ok(())
    }

    async fn query_jobs(
        &self,
        ctx: &RequestContext,
        filters: &[JobFilter],
        order: Option<OrderBy>,
        page: Option<PageRequest>,
    ) -> Result<Vec<Job>> {
        let now = self.now();
        let mut query = Self::select_jobs();
        security_check(self.auth.user(ctx).as_ref(), &mut query)?;
        for filter in filters {
            apply_filter(&mut query, filter, now);
        }
        query.order_by(order_clause(order.unwrap_or_default()));
        if let Some(page) = page {
            query.limit(page.items_per_page).offset(page.offset());
        }

        self.fetch_jobs(&query.build()).await
    }

    async fn count_jobs(&self, ctx: &RequestContext, filters: &[JobFilter]) -> Result<i64> {
        let now = self.now();
        let mut query = SelectBuilder::from("job");
        query.column("COUNT(job.id)");
        security_check(self.auth.user(ctx).as_ref(), &mut query)?;
        for filter in filters {
            apply_filter(&mut query, filter, now);
        }

        let row = self.stmts.fetch_optional(&query.build()).await?;
        match row {
            Some(row) => row.try_get::<i64, _>(0).map_err(map_sqlx_error),
            None => Ok(0),
        }
    }

    async fn count_grouped_jobs(
        &self,
        ctx: &RequestContext,
        aggregate: Aggregate,
        filters: &[JobFilter],
        weight: Option<Weight>,
        limit: Option<u32>,
    ) -> Result<HashMap<String, i64>> {
        self.grouped_counts(ctx, aggregate, filters, weight, limit)
            .await
    }

    async fn jobs_statistics(
        &self,
        ctx: &RequestContext,
        filters: &[JobFilter],
        group_by: Option<Aggregate>,
    ) -> Result<Vec<JobsStatistics>> {
        self.statistics(ctx, filters, group_by).await
    }

    async fn allocated_nodes(&self, cluster: &str) -> Result<AllocatedNodes> {
        let stmt = Statement::new(
            "SELECT job.resources, job.subcluster FROM job \
             WHERE job.job_state = ? AND job.cluster = ?",
        )
        .bind(JobState::Running.as_str())
        .bind(cluster);

        let mut subclusters = AllocatedNodes::new();
        for row in self.stmts.fetch_all(&stmt).await? {
            let raw: String = row.try_get("resources").map_err(map_sqlx_error)?;
            let subcluster: String = row.try_get("subcluster").map_err(map_sqlx_error)?;
            let resources: Vec<jobstore_core::domain::Resource> = serde_json::from_str(&raw)?;

            let hosts = subclusters.entry(subcluster).or_default();
            for resource in resources {
                *hosts.entry(resource.hostname).or_insert(0) += 1;
            }
        }
        Ok(subclusters)
    }

    async fn stop_jobs_exceeding_walltime_by(&self, grace_secs: i64) -> Result<u64> {
        let stmt = Statement::new(
            "UPDATE job SET monitoring_status = ?, duration = 0, job_state = ? \
             WHERE job.job_state = ? AND job.walltime > 0 \
             AND (? - job.start_time) > (job.walltime + ?)",
        )
        .bind(MonitoringStatus::ArchivingFailed.code())
        .bind(JobState::Failed.as_str())
        .bind(JobState::Running.as_str())
        .bind(self.now())
        .bind(grace_secs);

        let affected = self.stmts.execute(&stmt).await?;
        if affected > 0 {
            info!(
                affected,
                grace_secs, "Jobs marked as failed due to running too long"
            );
        }
        Ok(affected)
    }

    async fn find_user_or_project_or_jobname(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<SearchTarget> {
        if term.parse::<i64>().is_ok() {
            return Ok(SearchTarget::JobId);
        }

        let user = self
            .auth
            .user(ctx)
            .ok_or_else(|| AppError::Forbidden("anonymous search".into()))?;

        if user.is_elevated() {
            if let Some(name) = self
                .lookup_step(&user, term, ColumnLookup::JobUser, false)
                .await?
            {
                return Ok(SearchTarget::User(name));
            }
            if let Some(name) = self
                .lookup_step(&user, term, ColumnLookup::UsernameByName, true)
                .await?
            {
                return Ok(SearchTarget::User(name));
            }
            if let Some(project) = self
                .lookup_step(&user, term, ColumnLookup::JobProject, false)
                .await?
            {
                return Ok(SearchTarget::Project(project));
            }
        }

        let mut query = SelectBuilder::from("job");
        query.distinct().column("job.cluster");
        security_check(Some(&user), &mut query)?;
        query
            .and_where("job.meta_data LIKE ?", [Bind::Text(format!("%{}%", term))])
            .limit(1);

        match self.stmts.fetch_optional(&query.build()).await? {
            Some(row) => Ok(SearchTarget::JobName {
                cluster: row.try_get(0).map_err(map_sqlx_error)?,
            }),
            None => Err(AppError::NotFound(format!(
                "no job name, project or user matches {}",
                term
            ))),
        }
    }

    async fn find_column_value(
        &self,
        user: Option<&User>,
        term: &str,
        lookup: ColumnLookup,
        is_like: bool,
    ) -> Result<String> {
        require_elevated(user, lookup, term)?;

        let (table, select, column) = lookup_columns(lookup);
        let (condition, value) = if is_like {
            (format!("{} LIKE ?", column), format!("%{}%", term))
        } else {
            (format!("{} = ?", column), term.to_string())
        };

        let mut query = SelectBuilder::from(table);
        query
            .distinct()
            .column(select)
            .and_where(condition, [Bind::Text(value)])
            .limit(1);

        match self.stmts.fetch_optional(&query.build()).await? {
            Some(row) => row.try_get::<String, _>(0).map_err(map_sqlx_error),
            None => Err(AppError::NotFound(format!("{:?} {}", lookup, term))),
        }
    }

    async fn find_column_values(
        &self,
        user: Option<&User>,
        term: &str,
        lookup: ColumnLookup,
    ) -> Result<Vec<String>> {
        require_elevated(user, lookup, term)?;

        let (table, select, column) = lookup_columns(lookup);
        let mut query = SelectBuilder::from(table);
        query
            .distinct()
            .column(select)
            .and_where(format!("{} LIKE ?", column), [Bind::Text(format!("%{}%", term))]);

        self.stmts
            .fetch_all(&query.build())
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(0).map_err(map_sqlx_error))
            .collect()
    }

    async fn partitions(&self, cluster: &str) -> Result<Arc<Vec<String>>> {
        self.cache
            .get_or_compute(&partitions_key(cluster), || self.load_partitions(cluster))
            .await
    }

    async fn fetch_metadata(&self, job: &mut Job) -> Result<Option<Arc<Metadata>>> {
        let id = job.id;
        let started = Instant::now();

        match self
            .cache
            .get_or_compute(&metadata_key(id), || self.load_metadata(id))
            .await
        {
            Ok(meta) => {
                debug!(
                    id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetch_metadata"
                );
                job.meta_data = Some(Arc::clone(&meta));
                Ok(Some(meta).filter(|meta| !meta.is_empty()))
            }
            Err(AppError::Serialization(e)) => {
                warn!(id, error = %e, "Stored job metadata cannot be decoded");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_job_name(&self, job: &mut Job) -> Result<Option<String>> {
        self.fetch_metadata(job).await?;
        Ok(job.job_name().map(str::to_string))
    }

    async fn update_metadata(&self, job: &mut Job, key: &str, value: &str) -> Result<()> {
        let id = job.id;

        // merge base is always the stored row, never the caller's copy
        let meta = self
            .cache
            .update_with(&metadata_key(id), || async {
                let mut meta = match self.load_metadata(id).await {
                    Ok(current) => current.value,
                    Err(AppError::Serialization(e)) => {
                        warn!(id, error = %e, "Replacing undecodable job metadata");
                        Metadata::new()
                    }
                    Err(e) => return Err(e),
                };
                meta.insert(key.to_string(), value.to_string());

                let raw = match serde_json::to_string(&meta) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(id, error = %e, "Error while encoding job metadata");
                        return Err(e.into());
                    }
                };

                let stmt = Statement::new("UPDATE job SET meta_data = ? WHERE job.id = ?")
                    .bind(raw.as_str())
                    .bind(id);
                self.stmts.execute(&stmt).await?;
                Ok(Computed::new(meta, METADATA_TTL, raw.len()))
            })
            .await?;

        job.meta_data = Some(meta);
        Ok(())
    }

    async fn create_tag(&self, tag_type: &str, tag_name: &str) -> Result<TagId> {
        let stmt = Statement::new("INSERT INTO tag (tag_type, tag_name) VALUES (?, ?)")
            .bind(tag_type)
            .bind(tag_name);
        let id = self.stmts.insert(&stmt).await?;
        debug!(id, tag_type, tag_name, "Tag created");
        Ok(id)
    }

    async fn add_tag(&self, id: JobId, tag: TagId) -> Result<()> {
        let stmt = Statement::new("INSERT OR IGNORE INTO jobtag (job_id, tag_id) VALUES (?, ?)")
            .bind(id)
            .bind(tag);
        self.stmts.execute(&stmt).await?;
        Ok(())
    }
}

/// SQLite row representation of `JOB_COLUMNS`
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    job_id: i64,
    user: String,
    project: String,
    cluster: String,
    subcluster: String,
    start_time: i64,
    partition: Option<String>,
    array_job_id: i64,
    num_nodes: i32,
    num_hwthreads: i32,
    num_acc: i32,
    exclusive: i32,
    smt: i32,
    job_state: String,
    monitoring_status: i32,
    duration: i32,
    walltime: i64,
    resources: String,

    flops_any_avg: Option<f64>,
    mem_used_max: Option<f64>,
    mem_bw_avg: Option<f64>,
    net_bw_avg: Option<f64>,
    file_bw_avg: Option<f64>,
    load_avg: Option<f64>,
}

impl JobRow {
    fn into_job(self, now_secs: i64) -> Result<Job> {
        let mut job = Job {
            id: self.id,
            job_id: self.job_id,
            user: self.user,
            project: self.project,
            cluster: self.cluster,
            subcluster: self.subcluster,
            start_time: self.start_time,
            partition: self.partition,
            array_job_id: self.array_job_id,
            num_nodes: self.num_nodes,
            num_hwthreads: self.num_hwthreads,
            num_acc: self.num_acc,
            exclusive: self.exclusive,
            smt: self.smt,
            state: self.job_state.parse()?,
            monitoring_status: MonitoringStatus::try_from(self.monitoring_status)?,
            duration: self.duration,
            walltime: self.walltime,
            resources: serde_json::from_str(&self.resources)?,
            flops_any_avg: self.flops_any_avg,
            mem_used_max: self.mem_used_max,
            mem_bw_avg: self.mem_bw_avg,
            net_bw_avg: self.net_bw_avg,
            file_bw_avg: self.file_bw_avg,
            load_avg: self.load_avg,
            meta_data: None,
        };
        job.derive_running_duration(now_secs);
        Ok(job)
    }
}
