// Application Layer - Archiving pipeline and periodic maintenance

pub mod archiver;
pub mod maintenance;
mod shutdown;

// Re-exports
pub use archiver::{Archiver, ArchiverConfig};
pub use maintenance::{MaintenanceConfig, MaintenanceReport, MaintenanceScheduler};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
