// Statistics value types

use serde::{Deserialize, Serialize};

/// Per-metric summary produced by the archive client
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JobStatistics {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoPoint {
    pub value: i64,
    pub count: i64,
}

/// Aggregated numbers for one group (user, project, cluster) or for all jobs
/// when no grouping was requested (`id` is empty then).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsStatistics {
    pub id: String,
    pub name: Option<String>,
    pub total_jobs: i64,
    pub short_jobs: i64,
    /// Hours
    pub total_walltime: i64,
    pub total_core_hours: i64,
    pub hist_duration: Option<Vec<HistoPoint>>,
    pub hist_num_nodes: Option<Vec<HistoPoint>>,
}

impl JobsStatistics {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Add partial sums from another subcluster query
    pub fn merge_partial(&mut self, jobs: i64, walltime: i64, core_hours: i64) {
        self.total_jobs += jobs;
        self.total_walltime += walltime;
        self.total_core_hours += core_hours;
    }
}
