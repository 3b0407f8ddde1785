// Abstract job filter, aggregate and weight selectors
//
// These arrive as opaque values from the calling layer. Translation into SQL
// (column names, placeholders) belongs to the storage adapter.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::job::{JobState, TagId};

/// String predicate; every populated field must hold
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringInput {
    pub eq: Option<String>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
}

impl StringInput {
    pub fn eq(value: impl Into<String>) -> Self {
        Self {
            eq: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            contains: Some(value.into()),
            ..Default::default()
        }
    }
}

/// Inclusive integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub from: i64,
    pub to: i64,
}

/// Inclusive float range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub from: f64,
    pub to: f64,
}

/// Unix-seconds range, open on either side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

/// Conjunction of optional predicates over the job table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub tags: Option<Vec<TagId>>,
    pub job_id: Option<i64>,
    pub array_job_id: Option<i64>,
    pub user: Option<StringInput>,
    pub project: Option<StringInput>,
    pub job_name: Option<StringInput>,
    pub cluster: Option<StringInput>,
    pub partition: Option<StringInput>,
    pub state: Option<Vec<JobState>>,
    pub start_time: Option<TimeRange>,
    pub duration: Option<IntRange>,
    /// Seconds a running job must have been running for
    pub min_running_for: Option<i64>,
    pub num_nodes: Option<IntRange>,
    pub num_hwthreads: Option<IntRange>,
    pub num_accelerators: Option<IntRange>,
    pub exclusive: Option<i32>,
    pub flops_any_avg: Option<FloatRange>,
    pub mem_bw_avg: Option<FloatRange>,
    pub load_avg: Option<FloatRange>,
    pub mem_used_max: Option<FloatRange>,
}

/// Grouping key for aggregations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    User,
    Project,
    Cluster,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::User => "user",
            Aggregate::Project => "project",
            Aggregate::Cluster => "cluster",
        }
    }
}

impl FromStr for Aggregate {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Aggregate::User),
            "project" => Ok(Aggregate::Project),
            "cluster" => Ok(Aggregate::Cluster),
            other => Err(DomainError::UnknownAggregate(other.to_string())),
        }
    }
}

/// Weighting of grouped counts; absent means plain job count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    NodeCount,
    NodeHours,
    CoreHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort field for job listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    StartTime(SortDirection),
    Duration(SortDirection),
    NumNodes(SortDirection),
    JobId(SortDirection),
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy::StartTime(SortDirection::Desc)
    }
}

/// 1-based paging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub items_per_page: i64,
    pub page: i64,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.items_per_page
    }
}
