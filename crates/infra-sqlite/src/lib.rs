// Jobstore Infrastructure - SQLite Adapter
// Implements: JobRepository, with statement cache and filter/security query builder

mod connection;
mod dialect;
mod error;
mod job_repository;
mod migration;
pub mod query_builder;
pub mod security;
mod statement_cache;

pub use connection::{create_pool, PoolSettings};
pub use dialect::Driver;
pub use job_repository::{RepositoryOptions, SqliteJobRepository};
pub use migration::run_migrations;
pub use statement_cache::{Bind, Statement, StatementCache};
