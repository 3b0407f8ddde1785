// Port Layer - Interfaces for external dependencies

pub mod archive_client;
pub mod authorization;
pub mod job_repository;
pub mod time_provider;

// Re-exports
pub use archive_client::{ArchiveClient, ArchiveContext, ArchiveError, ArchivedJob};
pub use authorization::{AuthorizationProvider, ContextAuthorization};
pub use job_repository::{AllocatedNodes, ColumnLookup, JobRepository};
pub use time_provider::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
