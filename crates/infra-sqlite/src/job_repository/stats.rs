// Grouped counts and job statistics
//
// Core-hour weighting depends on the node hardware, which differs per
// subcluster, so those aggregates run one query per configured
// (cluster, subcluster) and merge the partial sums by group key.

use super::SqliteJobRepository;
use crate::error::map_sqlx_error;
use crate::query_builder::{apply_filter, group_column, SelectBuilder};
use crate::security::security_check;
use crate::statement_cache::Bind;
use jobstore_core::domain::{
    Aggregate, HistoPoint, JobFilter, JobState, JobsStatistics, RequestContext, User, Weight,
};
use jobstore_core::error::Result;
use jobstore_core::port::{ColumnLookup, JobRepository};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Display name used when a username has no entry in the user table
const UNKNOWN_NAME: &str = "-";

/// `CASE` expression for elapsed seconds; binds: running state, now
const ELAPSED: &str = "(CASE WHEN job.job_state = ? THEN ? - job.start_time ELSE job.duration END)";

impl SqliteJobRepository {
    fn elapsed_binds(&self) -> [Bind; 2] {
        [Bind::from(JobState::Running.as_str()), Bind::Int(self.now())]
    }

    /// Grouped query with the security restriction and filters already applied
    fn grouped_query(
        &self,
        user: Option<&User>,
        group: Option<Aggregate>,
        filters: &[JobFilter],
    ) -> Result<SelectBuilder> {
        let mut query = SelectBuilder::from("job");
        match group {
            Some(aggregate) => query.column(format!("{} AS id", group_column(aggregate))),
            None => query.column("'' AS id"),
        };
        security_check(user, &mut query)?;
        let now = self.now();
        for filter in filters {
            apply_filter(&mut query, filter, now);
        }
        Ok(query)
    }

    pub(super) async fn grouped_counts(
        &self,
        ctx: &RequestContext,
        aggregate: Aggregate,
        filters: &[JobFilter],
        weight: Option<Weight>,
        limit: Option<u32>,
    ) -> Result<HashMap<String, i64>> {
        let started = Instant::now();
        let user = self.auth.user(ctx);
        let cast = self.stmts.driver().int_cast();
        let column = group_column(aggregate);

        if weight == Some(Weight::CoreHours) {
            return self
                .core_hours_by_group(user.as_ref(), aggregate, filters, limit)
                .await;
        }

        let mut query = SelectBuilder::from("job");
        query.column(column);
        match weight {
            None => {
                query.column("COUNT(*) AS count");
            }
            Some(Weight::NodeCount) => {
                query.column("SUM(job.num_nodes) AS count");
            }
            Some(Weight::NodeHours) | Some(Weight::CoreHours) => {
                query.column_with(
                    format!(
                        "CAST(ROUND(SUM(job.num_nodes * {}) / 3600.0) AS {}) AS count",
                        ELAPSED, cast
                    ),
                    self.elapsed_binds(),
                );
            }
        }

        security_check(user.as_ref(), &mut query)?;
        let now = self.now();
        for filter in filters {
            apply_filter(&mut query, filter, now);
        }
        query.group_by(column).order_by("count DESC");
        if let Some(limit) = limit {
            query.limit(limit as i64);
        }

        let mut counts = HashMap::new();
        for row in self.stmts.fetch_all(&query.build()).await? {
            let (group, count) = group_count(&row)?;
            counts.insert(group, count);
        }

        debug!(
            aggregate = aggregate.as_str(),
            groups = counts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "count_grouped_jobs"
        );
        Ok(counts)
    }

    async fn core_hours_by_group(
        &self,
        user: Option<&User>,
        aggregate: Aggregate,
        filters: &[JobFilter],
        limit: Option<u32>,
    ) -> Result<HashMap<String, i64>> {
        let cast = self.stmts.driver().int_cast();
        let column = group_column(aggregate);
        let mut merged: HashMap<String, i64> = HashMap::new();

        // role check even when no topology is configured
        security_check(user, &mut SelectBuilder::from("job"))?;

        for cluster in &self.options.clusters {
            for subcluster in &cluster.subclusters {
                let mut query = SelectBuilder::from("job");
                let [state, now] = self.elapsed_binds();
                query.column(column).column_with(
                    format!(
                        "CAST(ROUND(SUM(job.num_nodes * {} * ?) / 3600.0) AS {}) AS count",
                        ELAPSED, cast
                    ),
                    [state, now, Bind::Int(subcluster.cores_per_node())],
                );
                security_check(user, &mut query)?;
                query
                    .and_where("job.cluster = ?", [Bind::from(cluster.name.as_str())])
                    .and_where("job.subcluster = ?", [Bind::from(subcluster.name.as_str())]);
                let now = self.now();
                for filter in filters {
                    apply_filter(&mut query, filter, now);
                }
                query.group_by(column);

                for row in self.stmts.fetch_all(&query.build()).await? {
                    let (group, count) = group_count(&row)?;
                    *merged.entry(group).or_insert(0) += count;
                }
            }
        }

        let mut ranked: Vec<(String, i64)> = merged.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = limit {
            ranked.truncate(limit as usize);
        }
        Ok(ranked.into_iter().collect())
    }

    pub(super) async fn statistics(
        &self,
        ctx: &RequestContext,
        filters: &[JobFilter],
        group_by: Option<Aggregate>,
    ) -> Result<Vec<JobsStatistics>> {
        let started = Instant::now();
        let user = self.auth.user(ctx);
        let cast = self.stmts.driver().int_cast();

        let mut stats: HashMap<String, JobsStatistics> = HashMap::new();
        if group_by.is_none() {
            stats.insert(String::new(), JobsStatistics::new(""));
        }

        for cluster in &self.options.clusters {
            for subcluster in &cluster.subclusters {
                let mut query = self.grouped_query(user.as_ref(), group_by, filters)?;
                query
                    .column("COUNT(job.id) AS jobs")
                    .column(format!(
                        "CAST(ROUND(SUM(job.duration) / 3600.0) AS {}) AS walltime",
                        cast
                    ))
                    .column_with(
                        format!(
                            "CAST(ROUND(SUM(job.duration * job.num_nodes * ? * ?) / 3600.0) AS {}) AS core_hours",
                            cast
                        ),
                        [
                            Bind::Int(subcluster.sockets_per_node),
                            Bind::Int(subcluster.cores_per_socket),
                        ],
                    )
                    .and_where("job.cluster = ?", [Bind::from(cluster.name.as_str())])
                    .and_where("job.subcluster = ?", [Bind::from(subcluster.name.as_str())]);
                if let Some(aggregate) = group_by {
                    query.group_by(group_column(aggregate));
                }

                for row in self.stmts.fetch_all(&query.build()).await? {
                    let id: Option<String> = row.try_get("id").map_err(map_sqlx_error)?;
                    let Some(id) = id else { continue };
                    let jobs: i64 = row.try_get("jobs").map_err(map_sqlx_error)?;
                    let walltime: Option<i64> = row.try_get("walltime").map_err(map_sqlx_error)?;
                    let core_hours: Option<i64> =
                        row.try_get("core_hours").map_err(map_sqlx_error)?;

                    stats
                        .entry(id.clone())
                        .or_insert_with(|| JobsStatistics::new(id))
                        .merge_partial(jobs, walltime.unwrap_or(0), core_hours.unwrap_or(0));
                }
            }
        }

        self.add_short_jobs(user.as_ref(), filters, group_by, &mut stats)
            .await?;

        if group_by == Some(Aggregate::User) {
            for stat in stats.values_mut() {
                stat.name = Some(self.display_name(user.as_ref(), &stat.id).await?);
            }
        }

        let mut result: Vec<JobsStatistics> = stats.into_values().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));

        let want_duration = ctx.wants_field("histDuration");
        let want_nodes = ctx.wants_field("histNumNodes");
        if want_duration || want_nodes {
            let running = JobState::Running.as_str();
            for stat in &mut result {
                let scope = group_by.map(|aggregate| (group_column(aggregate), stat.id.as_str()));
                if want_duration {
                    let value = format!("CAST(ROUND({} / 3600) AS {})", ELAPSED, cast);
                    stat.hist_duration = Some(
                        self.histogram(
                            user.as_ref(),
                            &value,
                            [Bind::from(running), Bind::Int(self.now())],
                            filters,
                            scope,
                        )
                        .await?,
                    );
                }
                if want_nodes {
                    stat.hist_num_nodes = Some(
                        self.histogram(user.as_ref(), "job.num_nodes", [], filters, scope)
                            .await?,
                    );
                }
            }
        }

        debug!(
            groups = result.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "jobs_statistics"
        );
        Ok(result)
    }

    async fn add_short_jobs(
        &self,
        user: Option<&User>,
        filters: &[JobFilter],
        group_by: Option<Aggregate>,
        stats: &mut HashMap<String, JobsStatistics>,
    ) -> Result<()> {
        let mut query = self.grouped_query(user, group_by, filters)?;
        query.column("COUNT(job.id) AS short_jobs").and_where(
            "job.duration < ?",
            [Bind::Int(self.options.short_running_jobs_duration)],
        );
        if let Some(aggregate) = group_by {
            query.group_by(group_column(aggregate));
        }

        for row in self.stmts.fetch_all(&query.build()).await? {
            let id: Option<String> = row.try_get("id").map_err(map_sqlx_error)?;
            let Some(id) = id else { continue };
            let short_jobs: i64 = row.try_get("short_jobs").map_err(map_sqlx_error)?;
            stats
                .entry(id.clone())
                .or_insert_with(|| JobsStatistics::new(id))
                .short_jobs = short_jobs;
        }
        Ok(())
    }

    async fn display_name(&self, user: Option<&User>, username: &str) -> Result<String> {
        match self
            .find_column_value(user, username, ColumnLookup::NameByUsername, false)
            .await
        {
            Ok(name) if !name.is_empty() => Ok(name),
            Ok(_) => Ok(UNKNOWN_NAME.to_string()),
            Err(e) if e.is_not_found() || e.is_forbidden() => Ok(UNKNOWN_NAME.to_string()),
            Err(e) => Err(e),
        }
    }

    /// Bucketed counts; `value` is an SQL expression named `value` in the result
    async fn histogram<const N: usize>(
        &self,
        user: Option<&User>,
        value: &str,
        value_binds: [Bind; N],
        filters: &[JobFilter],
        scope: Option<(&'static str, &str)>,
    ) -> Result<Vec<HistoPoint>> {
        let mut query = SelectBuilder::from("job");
        query
            .column_with(format!("{} AS value", value), value_binds)
            .column("COUNT(job.id) AS count");
        security_check(user, &mut query)?;
        let now = self.now();
        for filter in filters {
            apply_filter(&mut query, filter, now);
        }
        if let Some((column, id)) = scope {
            query.and_where(format!("{} = ?", column), [Bind::from(id)]);
        }
        query.group_by("value").order_by("value");

        self.stmts
            .fetch_all(&query.build())
            .await?
            .iter()
            .map(|row| {
                Ok(HistoPoint {
                    value: row
                        .try_get::<Option<i64>, _>("value")
                        .map_err(map_sqlx_error)?
                        .unwrap_or(0),
                    count: row.try_get("count").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }
}

fn group_count(row: &SqliteRow) -> Result<(String, i64)> {
    let group: String = row.try_get(0).map_err(map_sqlx_error)?;
    let count: Option<i64> = row.try_get("count").map_err(map_sqlx_error)?;
    Ok((group, count.unwrap_or(0)))
}
