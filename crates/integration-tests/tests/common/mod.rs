//! Shared fixtures: temp-file database, fixed clock, two-subcluster topology

#![allow(dead_code)]

use jobstore_core::domain::{
    Cluster, JobId, JobState, MonitoringStatus, NewJob, RequestContext, Resource, Role,
    SubCluster, User,
};
use jobstore_core::port::{ContextAuthorization, FixedTimeProvider, JobRepository};
use jobstore_core::ResultCache;
use jobstore_infra_sqlite::{
    create_pool, run_migrations, Driver, PoolSettings, RepositoryOptions, SqliteJobRepository,
    StatementCache,
};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

pub const NOW: i64 = 1_700_000_000;
pub const HOUR: i64 = 3600;

pub struct TestEnv {
    pub repo: Arc<SqliteJobRepository>,
    pub cache: Arc<ResultCache>,
    pub clock: Arc<FixedTimeProvider>,
    pub pool: SqlitePool,
    path: PathBuf,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_options(RepositoryOptions {
            short_running_jobs_duration: 300,
            clusters: topology(),
        })
        .await
    }

    pub async fn with_options(options: RepositoryOptions) -> Self {
        let path = std::env::temp_dir().join(format!("jobstore-it-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&format!("sqlite://{}", path.display()), PoolSettings::default())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let cache = Arc::new(ResultCache::default());
        let clock = Arc::new(FixedTimeProvider::at_secs(NOW));
        let repo = Arc::new(SqliteJobRepository::new(
            Arc::new(StatementCache::new(pool.clone(), Driver::Sqlite)),
            Arc::clone(&cache),
            Arc::new(ContextAuthorization),
            clock.clone(),
            options,
        ));

        Self {
            repo,
            cache,
            clock,
            pool,
            path,
        }
    }

    pub fn dyn_repo(&self) -> Arc<dyn JobRepository> {
        self.repo.clone()
    }

    /// Insert a job that already finished
    pub async fn finished(&self, job: NewJob, duration: i32) -> JobId {
        let id = self.repo.start(&job).await.unwrap();
        self.repo
            .stop(
                id,
                duration,
                JobState::Completed,
                MonitoringStatus::RunningOrArchiving,
            )
            .await
            .unwrap();
        id
    }

    pub async fn add_user(&self, username: &str, name: &str) {
        sqlx::query("INSERT INTO user (username, name) VALUES (?, ?)")
            .bind(username)
            .bind(name)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// fritz/main: 2 x 36 cores per node, fritz/spr: 2 x 52 cores per node
pub fn topology() -> Vec<Cluster> {
    vec![Cluster {
        name: "fritz".into(),
        subclusters: vec![
            SubCluster {
                name: "main".into(),
                sockets_per_node: 2,
                cores_per_socket: 36,
            },
            SubCluster {
                name: "spr".into(),
                sockets_per_node: 2,
                cores_per_socket: 52,
            },
        ],
    }]
}

pub fn job(job_id: i64, user: &str, project: &str, start_time: i64) -> NewJob {
    let mut job = NewJob::new(job_id, user, project, "fritz", "main", start_time);
    job.resources = vec![Resource::host(format!("f{:04}", job_id % 10_000))];
    job
}

pub fn admin() -> RequestContext {
    RequestContext::for_user(User::new("root", vec![Role::Admin]))
}

pub fn plain_user(username: &str, projects: &[&str]) -> RequestContext {
    RequestContext::for_user(
        User::new(username, vec![Role::User])
            .with_projects(projects.iter().map(|p| p.to_string()).collect()),
    )
}
