//! Daemon configuration
//!
//! Sources, later ones override earlier ones:
//! 1. built-in defaults
//! 2. TOML file (`jobstore.toml`, or the path in `JOBSTORE_CONFIG`)
//! 3. `JOBSTORE__<SECTION>__<KEY>` environment variables

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use jobstore_core::application::archiver::{DEFAULT_ARCHIVE_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
use jobstore_core::domain::Cluster;
use jobstore_core::ResultCache;
use jobstore_infra_sqlite::Driver;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "JOBSTORE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "jobstore.toml";
const ENV_PREFIX: &str = "JOBSTORE";
const SQLITE_SCHEME: &str = "sqlite://";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub driver: String,
    pub max_connections: u32,
    pub statement_cache_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://~/.jobstore/job.db".to_string(),
            driver: "sqlite".to_string(),
            max_connections: 10,
            statement_cache_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total cost budget of the result cache in bytes
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: ResultCache::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.jobstore/archive"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout_secs: DEFAULT_ARCHIVE_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub interval_secs: u64,
    pub walltime_grace_secs: i64,
    pub retention_days: Option<i64>,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            walltime_grace_secs: 300,
            retention_days: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to this file (non-blocking)
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub archive: ArchiveConfig,
    pub maintenance: MaintenanceSection,
    pub logging: LoggingConfig,
    /// Jobs shorter than this many seconds count as short jobs
    pub short_running_jobs_duration: i64,
    pub clusters: Vec<Cluster>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            archive: ArchiveConfig::default(),
            maintenance: MaintenanceSection::default(),
            logging: LoggingConfig::default(),
            short_running_jobs_duration: 300,
            clusters: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from the config file and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let required = explicit.is_some();
        let path = explicit.unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        Self::from_builder(
            Config::builder()
                .add_source(
                    File::with_name(&path)
                        .format(FileFormat::Toml)
                        .required(required),
                )
                .add_source(environment()),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let mut config: DaemonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        config.expand_paths();
        Ok(config)
    }

    /// The daemon only builds SQLite pools
    fn validate(&self) -> Result<(), ConfigError> {
        match self.database.driver.parse::<Driver>() {
            Ok(Driver::Sqlite) => Ok(()),
            Ok(other) => Err(ConfigError::Message(format!(
                "database.driver '{}' is not supported by this daemon, use sqlite",
                other.as_str()
            ))),
            Err(e) => Err(ConfigError::Message(e.to_string())),
        }
    }

    fn expand_paths(&mut self) {
        if let Some(path) = self.database.url.strip_prefix(SQLITE_SCHEME) {
            self.database.url = format!("{}{}", SQLITE_SCHEME, shellexpand::tilde(path));
        }
        self.archive.root = expand(&self.archive.root);
        if let Some(file) = &self.logging.file {
            self.logging.file = Some(expand(file));
        }
    }

    pub fn archive_timeout(&self) -> Option<Duration> {
        match self.archive.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn expand(path: &std::path::Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
