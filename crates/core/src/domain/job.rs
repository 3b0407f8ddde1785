// Job Domain Model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::error::DomainError;

/// Internal database id (surrogate key)
pub type JobId = i64;

/// Tag identifier
pub type TagId = i64;

/// Free-form job metadata (job name, script, ...)
pub type Metadata = HashMap<String, String>;

/// Job run state as reported by the batch scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
    Stopped,
    Timeout,
    Preempted,
    OutOfMemory,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Stopped => "stopped",
            JobState::Timeout => "timeout",
            JobState::Preempted => "preempted",
            JobState::OutOfMemory => "out_of_memory",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            "stopped" => Ok(JobState::Stopped),
            "timeout" => Ok(JobState::Timeout),
            "preempted" => Ok(JobState::Preempted),
            "out_of_memory" => Ok(JobState::OutOfMemory),
            other => Err(DomainError::UnknownJobState(other.to_string())),
        }
    }
}

/// Lifecycle of post-completion metric archival, distinct from [`JobState`].
///
/// Stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringStatus {
    Disabled,
    #[default]
    RunningOrArchiving,
    ArchivingFailed,
    ArchivingSuccessful,
}

impl MonitoringStatus {
    pub fn code(&self) -> i32 {
        match self {
            MonitoringStatus::Disabled => 0,
            MonitoringStatus::RunningOrArchiving => 1,
            MonitoringStatus::ArchivingFailed => 2,
            MonitoringStatus::ArchivingSuccessful => 3,
        }
    }

    /// Archiving has finished, one way or the other.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitoringStatus::ArchivingFailed | MonitoringStatus::ArchivingSuccessful
        )
    }
}

impl TryFrom<i32> for MonitoringStatus {
    type Error = DomainError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MonitoringStatus::Disabled),
            1 => Ok(MonitoringStatus::RunningOrArchiving),
            2 => Ok(MonitoringStatus::ArchivingFailed),
            3 => Ok(MonitoringStatus::ArchivingSuccessful),
            other => Err(DomainError::UnknownMonitoringStatus(other)),
        }
    }
}

/// One allocated host of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwthreads: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

impl Resource {
    pub fn host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            hwthreads: None,
            accelerators: None,
            configuration: None,
        }
    }
}

/// Job Entity (one row of the job table, blobs already decoded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_id: i64,
    pub user: String,
    pub project: String,
    pub cluster: String,
    pub subcluster: String,
    pub start_time: i64, // unix seconds
    pub partition: Option<String>,
    pub array_job_id: i64,

    pub num_nodes: i32,
    pub num_hwthreads: i32,
    pub num_acc: i32,
    pub exclusive: i32,
    pub smt: i32,

    pub state: JobState,
    pub monitoring_status: MonitoringStatus,
    pub duration: i32, // seconds, 0 while running
    pub walltime: i64, // seconds, 0 = unlimited

    pub resources: Vec<Resource>,

    // Summary statistics, written once at archival time
    pub flops_any_avg: Option<f64>,
    pub mem_used_max: Option<f64>,
    pub mem_bw_avg: Option<f64>,
    pub net_bw_avg: Option<f64>,
    pub file_bw_avg: Option<f64>,
    pub load_avg: Option<f64>,

    /// Loaded on demand through the metadata accessors of the repository.
    #[serde(skip)]
    pub meta_data: Option<Arc<Metadata>>,
}

impl Job {
    /// Replace a zero duration of a running job by the elapsed time.
    ///
    /// Applied on every read, never persisted.
    pub fn derive_running_duration(&mut self, now_secs: i64) {
        if self.state == JobState::Running && self.duration == 0 {
            self.duration = (now_secs - self.start_time).max(0) as i32;
        }
    }

    /// Display name from metadata, if metadata was loaded
    pub fn job_name(&self) -> Option<&str> {
        self.meta_data
            .as_ref()
            .and_then(|m| m.get("jobName"))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// Input for inserting a job (statistics are not transferred)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub job_id: i64,
    pub user: String,
    pub project: String,
    pub cluster: String,
    pub subcluster: String,
    pub start_time: i64,
    pub partition: Option<String>,
    pub array_job_id: i64,

    pub num_nodes: i32,
    pub num_hwthreads: i32,
    pub num_acc: i32,
    pub exclusive: i32,
    pub smt: i32,

    pub state: JobState,
    pub monitoring_status: MonitoringStatus,
    pub duration: i32,
    pub walltime: i64,

    pub resources: Vec<Resource>,
    #[serde(default)]
    pub meta_data: Metadata,
}

impl NewJob {
    pub fn new(
        job_id: i64,
        user: impl Into<String>,
        project: impl Into<String>,
        cluster: impl Into<String>,
        subcluster: impl Into<String>,
        start_time: i64,
    ) -> Self {
        Self {
            job_id,
            user: user.into(),
            project: project.into(),
            cluster: cluster.into(),
            subcluster: subcluster.into(),
            start_time,
            num_nodes: 1,
            exclusive: 1,
            smt: 1,
            ..Default::default()
        }
    }
}

/// Outcome of the free-text search resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTarget {
    /// Term is numeric, caller should treat it as a job id
    JobId,
    User(String),
    Project(String),
    /// Term matched a job name; carries the cluster of a matching job
    JobName { cluster: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_job(start_time: i64) -> Job {
        Job {
            id: 1,
            job_id: 100,
            user: "alice".into(),
            project: "p1".into(),
            cluster: "fritz".into(),
            subcluster: "main".into(),
            start_time,
            partition: None,
            array_job_id: 0,
            num_nodes: 1,
            num_hwthreads: 0,
            num_acc: 0,
            exclusive: 1,
            smt: 1,
            state: JobState::Running,
            monitoring_status: MonitoringStatus::RunningOrArchiving,
            duration: 0,
            walltime: 0,
            resources: vec![],
            flops_any_avg: None,
            mem_used_max: None,
            mem_bw_avg: None,
            net_bw_avg: None,
            file_bw_avg: None,
            load_avg: None,
            meta_data: None,
        }
    }

    #[test]
    fn test_job_state_round_trip_names() {
        for state in [JobState::Running, JobState::OutOfMemory, JobState::Cancelled] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn test_monitoring_status_codes() {
        assert_eq!(MonitoringStatus::ArchivingFailed.code(), 2);
        assert_eq!(
            MonitoringStatus::try_from(3).unwrap(),
            MonitoringStatus::ArchivingSuccessful
        );
        assert!(MonitoringStatus::try_from(7).is_err());
        assert!(!MonitoringStatus::RunningOrArchiving.is_terminal());
    }

    #[test]
    fn test_running_duration_is_derived() {
        let mut job = running_job(1_000);
        job.derive_running_duration(1_600);
        assert_eq!(job.duration, 600);
    }

    #[test]
    fn test_finished_duration_is_kept() {
        let mut job = running_job(1_000);
        job.state = JobState::Completed;
        job.duration = 42;
        job.derive_running_duration(5_000);
        assert_eq!(job.duration, 42);
    }

    #[test]
    fn test_resources_blob_shape() {
        let json = r#"[{"hostname":"n01","hwthreads":[0,1]},{"hostname":"n02"}]"#;
        let resources: Vec<Resource> = serde_json::from_str(json).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].hwthreads.as_deref(), Some(&[0, 1][..]));
        assert_eq!(resources[1], Resource::host("n02"));
    }
}
