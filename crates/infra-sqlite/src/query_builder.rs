// Filter Query Builder
// Turns JobFilter predicates into a parameterized SELECT. Column names only
// ever come from the match arms below; caller input is always bound.

use crate::statement_cache::{Bind, Statement};
use jobstore_core::domain::{
    Aggregate, FloatRange, IntRange, JobFilter, JobState, OrderBy, SortDirection, StringInput,
    TimeRange,
};

/// Columns read into a `Job` (meta_data is loaded separately through the cache)
pub const JOB_COLUMNS: &str = "job.id, job.job_id, job.user, job.project, job.cluster, \
    job.subcluster, job.start_time, job.\"partition\", job.array_job_id, job.num_nodes, \
    job.num_hwthreads, job.num_acc, job.\"exclusive\", job.smt, job.job_state, \
    job.monitoring_status, job.duration, job.walltime, job.resources, job.flops_any_avg, \
    job.mem_used_max, job.mem_bw_avg, job.net_bw_avg, job.file_bw_avg, job.load_avg";

/// Minimal SELECT builder with positional `?` placeholders
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    distinct: bool,
    columns: Vec<String>,
    column_binds: Vec<Bind>,
    from: &'static str,
    wheres: Vec<String>,
    where_binds: Vec<Bind>,
    group_by: Option<&'static str>,
    order_by: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SelectBuilder {
    pub fn from(table: &'static str) -> Self {
        Self {
            distinct: false,
            columns: Vec::new(),
            column_binds: Vec::new(),
            from: table,
            wheres: Vec::new(),
            where_binds: Vec::new(),
            group_by: None,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    pub fn column(&mut self, expr: impl Into<String>) -> &mut Self {
        self.columns.push(expr.into());
        self
    }

    /// Column expression with placeholders of its own (bound before any WHERE value)
    pub fn column_with(
        &mut self,
        expr: impl Into<String>,
        binds: impl IntoIterator<Item = Bind>,
    ) -> &mut Self {
        self.columns.push(expr.into());
        self.column_binds.extend(binds);
        self
    }

    /// AND one condition onto the WHERE clause
    pub fn and_where(
        &mut self,
        expr: impl Into<String>,
        binds: impl IntoIterator<Item = Bind>,
    ) -> &mut Self {
        self.wheres.push(expr.into());
        self.where_binds.extend(binds);
        self
    }

    pub fn group_by(&mut self, expr: &'static str) -> &mut Self {
        self.group_by = Some(expr);
        self
    }

    pub fn order_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.order_by = Some(expr.into());
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn build(&self) -> Statement {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.columns.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(self.from);

        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.wheres.join(" AND "));
        }
        if let Some(group) = self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if self.limit.is_some() {
            sql.push_str(" LIMIT ?");
            if self.offset.is_some() {
                sql.push_str(" OFFSET ?");
            }
        }

        let mut binds = Vec::with_capacity(self.column_binds.len() + self.where_binds.len() + 2);
        binds.extend(self.column_binds.iter().cloned());
        binds.extend(self.where_binds.iter().cloned());
        if let Some(limit) = self.limit {
            binds.push(Bind::Int(limit));
            if let Some(offset) = self.offset {
                binds.push(Bind::Int(offset));
            }
        }

        Statement { sql, binds }
    }
}

/// Comma separated `?` list for `IN (...)`
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub fn group_column(aggregate: Aggregate) -> &'static str {
    match aggregate {
        Aggregate::User => "job.user",
        Aggregate::Project => "job.project",
        Aggregate::Cluster => "job.cluster",
    }
}

pub fn order_clause(order: OrderBy) -> String {
    let (column, direction) = match order {
        OrderBy::StartTime(dir) => ("job.start_time", dir),
        OrderBy::Duration(dir) => ("job.duration", dir),
        OrderBy::NumNodes(dir) => ("job.num_nodes", dir),
        OrderBy::JobId(dir) => ("job.job_id", dir),
    };
    let direction = match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    format!("{} {}", column, direction)
}

/// Add every predicate set in `filter`. `now` (unix seconds) is used by
/// `min_running_for`.
pub fn apply_filter(query: &mut SelectBuilder, filter: &JobFilter, now: i64) {
    if let Some(tags) = filter.tags.as_ref().filter(|t| !t.is_empty()) {
        query.and_where(
            format!(
                "job.id IN (SELECT jobtag.job_id FROM jobtag WHERE jobtag.tag_id IN ({}))",
                placeholders(tags.len())
            ),
            tags.iter().map(|&t| Bind::Int(t)),
        );
    }
    if let Some(job_id) = filter.job_id {
        query.and_where("job.job_id = ?", [Bind::Int(job_id)]);
    }
    if let Some(array_job_id) = filter.array_job_id {
        query.and_where("job.array_job_id = ?", [Bind::Int(array_job_id)]);
    }
    if let Some(user) = &filter.user {
        string_condition(query, "job.user", user);
    }
    if let Some(project) = &filter.project {
        string_condition(query, "job.project", project);
    }
    if let Some(job_name) = &filter.job_name {
        job_name_condition(query, job_name);
    }
    if let Some(cluster) = &filter.cluster {
        string_condition(query, "job.cluster", cluster);
    }
    if let Some(partition) = &filter.partition {
        string_condition(query, "job.\"partition\"", partition);
    }
    if let Some(states) = filter.state.as_ref().filter(|s| !s.is_empty()) {
        query.and_where(
            format!("job.job_state IN ({})", placeholders(states.len())),
            states.iter().map(|s| Bind::from(s.as_str())),
        );
    }
    if let Some(range) = &filter.start_time {
        time_condition(query, "job.start_time", range);
    }
    if let Some(range) = &filter.duration {
        int_condition(query, "job.duration", range);
    }
    if let Some(secs) = filter.min_running_for {
        query.and_where(
            "job.job_state = ? AND (? - job.start_time) > ?",
            [
                Bind::from(JobState::Running.as_str()),
                Bind::Int(now),
                Bind::Int(secs),
            ],
        );
    }
    if let Some(range) = &filter.num_nodes {
        int_condition(query, "job.num_nodes", range);
    }
    if let Some(range) = &filter.num_hwthreads {
        int_condition(query, "job.num_hwthreads", range);
    }
    if let Some(range) = &filter.num_accelerators {
        int_condition(query, "job.num_acc", range);
    }
    if let Some(exclusive) = filter.exclusive {
        query.and_where("job.\"exclusive\" = ?", [Bind::from(exclusive)]);
    }
    if let Some(range) = &filter.flops_any_avg {
        float_condition(query, "job.flops_any_avg", range);
    }
    if let Some(range) = &filter.mem_bw_avg {
        float_condition(query, "job.mem_bw_avg", range);
    }
    if let Some(range) = &filter.load_avg {
        float_condition(query, "job.load_avg", range);
    }
    if let Some(range) = &filter.mem_used_max {
        float_condition(query, "job.mem_used_max", range);
    }
}

fn string_condition(query: &mut SelectBuilder, column: &'static str, input: &StringInput) {
    if let Some(eq) = &input.eq {
        query.and_where(format!("{} = ?", column), [Bind::from(eq.as_str())]);
    }
    if let Some(prefix) = &input.starts_with {
        query.and_where(format!("{} LIKE ?", column), [Bind::Text(format!("{}%", prefix))]);
    }
    if let Some(suffix) = &input.ends_with {
        query.and_where(format!("{} LIKE ?", column), [Bind::Text(format!("%{}", suffix))]);
    }
    if let Some(part) = &input.contains {
        query.and_where(format!("{} LIKE ?", column), [Bind::Text(format!("%{}%", part))]);
    }
}

/// Job names live in the serialized metadata blob as `"jobName":"<name>"`
fn job_name_condition(query: &mut SelectBuilder, input: &StringInput) {
    const KEY: &str = "\"jobName\":\"";
    if let Some(eq) = &input.eq {
        query.and_where(
            "job.meta_data LIKE ?",
            [Bind::Text(format!("%{}{}\"%", KEY, eq))],
        );
    }
    if let Some(prefix) = &input.starts_with {
        query.and_where(
            "job.meta_data LIKE ?",
            [Bind::Text(format!("%{}{}%", KEY, prefix))],
        );
    }
    if let Some(suffix) = &input.ends_with {
        query.and_where(
            "job.meta_data LIKE ?",
            [Bind::Text(format!("%{}%{}\"%", KEY, suffix))],
        );
    }
    if let Some(part) = &input.contains {
        query.and_where(
            "job.meta_data LIKE ?",
            [Bind::Text(format!("%{}%{}%\"%", KEY, part))],
        );
    }
}

fn int_condition(query: &mut SelectBuilder, column: &'static str, range: &IntRange) {
    query.and_where(
        format!("{} BETWEEN ? AND ?", column),
        [Bind::Int(range.from), Bind::Int(range.to)],
    );
}

fn float_condition(query: &mut SelectBuilder, column: &'static str, range: &FloatRange) {
    query.and_where(
        format!("{} BETWEEN ? AND ?", column),
        [Bind::Float(range.from), Bind::Float(range.to)],
    );
}

fn time_condition(query: &mut SelectBuilder, column: &'static str, range: &TimeRange) {
    match (range.from, range.to) {
        (Some(from), Some(to)) => {
            query.and_where(
                format!("{} BETWEEN ? AND ?", column),
                [Bind::Int(from), Bind::Int(to)],
            );
        }
        (Some(from), None) => {
            query.and_where(format!("{} >= ?", column), [Bind::Int(from)]);
        }
        (None, Some(to)) => {
            query.and_where(format!("{} <= ?", column), [Bind::Int(to)]);
        }
        (None, None) => {}
    }
}
