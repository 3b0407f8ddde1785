// Jobstore Core - Domain Logic, Ports, Result Cache, Archiving Pipeline
// NO infrastructure dependencies (hexagonal architecture)

pub mod application;
pub mod cache;
pub mod domain;
pub mod error;
pub mod port;

pub use cache::{Computed, ResultCache};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
