// Domain Layer - Pure entities and value types

pub mod auth;
pub mod cluster;
pub mod error;
pub mod filter;
pub mod job;
pub mod stats;

// Re-exports
pub use auth::{RequestContext, Role, User};
pub use cluster::{Cluster, SubCluster};
pub use error::DomainError;
pub use filter::{
    Aggregate, FloatRange, IntRange, JobFilter, OrderBy, PageRequest, SortDirection, StringInput,
    TimeRange, Weight,
};
pub use job::{
    Job, JobId, JobState, Metadata, MonitoringStatus, NewJob, Resource, SearchTarget, TagId,
};
pub use stats::{HistoPoint, JobStatistics, JobsStatistics};
