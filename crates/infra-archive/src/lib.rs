// Jobstore Infrastructure - Archive Adapters
// Implements: ArchiveClient

pub mod local_archive;

pub use local_archive::LocalArchiveClient;
