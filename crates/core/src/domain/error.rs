// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Unknown job state: {0}")]
    UnknownJobState(String),

    #[error("Unknown monitoring status: {0}")]
    UnknownMonitoringStatus(i32),

    #[error("Unknown aggregate: {0}")]
    UnknownAggregate(String),
}
