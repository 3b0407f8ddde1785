//! Walltime enforcement and retention cleanup

mod common;

use common::{admin, job, TestEnv, HOUR, NOW};
use jobstore_core::application::{
    shutdown_channel, MaintenanceConfig, MaintenanceReport, MaintenanceScheduler,
};
use jobstore_core::domain::{JobState, MonitoringStatus};
use jobstore_core::port::JobRepository;
use std::time::Duration;

const DAY: i64 = 86_400;

#[tokio::test]
async fn test_walltime_grace_boundary() {
    let env = TestEnv::new().await;

    let mut over = job(1, "alice", "p1", NOW - 3700);
    over.walltime = 3600;
    let over = env.repo.start(&over).await.unwrap();

    let mut within = job(2, "alice", "p1", NOW - 3000);
    within.walltime = 3600;
    let within = env.repo.start(&within).await.unwrap();

    // walltime 0 means unlimited
    let unlimited = env.repo.start(&job(3, "alice", "p1", NOW - 10 * DAY)).await.unwrap();

    let mut finished = job(4, "alice", "p1", NOW - 5 * HOUR);
    finished.walltime = 3600;
    let finished = env.finished(finished, 3600).await;

    assert_eq!(env.repo.stop_jobs_exceeding_walltime_by(60).await.unwrap(), 1);

    let stopped = env.repo.find_by_id(over).await.unwrap();
    assert_eq!(stopped.state, JobState::Failed);
    assert_eq!(stopped.monitoring_status, MonitoringStatus::ArchivingFailed);
    assert_eq!(stopped.duration, 0);

    assert_eq!(
        env.repo.find_by_id(within).await.unwrap().state,
        JobState::Running
    );
    assert_eq!(
        env.repo.find_by_id(unlimited).await.unwrap().state,
        JobState::Running
    );
    assert_eq!(
        env.repo.find_by_id(finished).await.unwrap().state,
        JobState::Completed
    );

    // the clock moves past the grace for the second job
    env.clock.advance_secs(700);
    assert_eq!(env.repo.stop_jobs_exceeding_walltime_by(60).await.unwrap(), 1);
    assert_eq!(
        env.repo.find_by_id(within).await.unwrap().state,
        JobState::Failed
    );
}

#[tokio::test]
async fn test_run_once_applies_walltime_and_retention() {
    let env = TestEnv::new().await;

    let mut overdue = job(1, "alice", "p1", NOW - 2 * HOUR);
    overdue.walltime = HOUR;
    env.repo.start(&overdue).await.unwrap();
    env.finished(job(2, "alice", "p1", NOW - 40 * DAY), 600).await;
    env.finished(job(3, "alice", "p1", NOW - 20 * DAY), 600).await;

    let scheduler = MaintenanceScheduler::new(
        env.dyn_repo(),
        env.clock.clone(),
        MaintenanceConfig {
            interval: Duration::from_secs(3600),
            walltime_grace_secs: 300,
            retention_days: Some(30),
        },
    );

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(
        report,
        MaintenanceReport {
            stopped_jobs: 1,
            deleted_jobs: 1,
        }
    );
    assert_eq!(env.repo.count_jobs(&admin(), &[]).await.unwrap(), 2);

    // nothing left to do
    assert_eq!(scheduler.run_once().await.unwrap(), MaintenanceReport::default());
}

#[tokio::test]
async fn test_without_retention_nothing_is_deleted() {
    let env = TestEnv::new().await;
    env.finished(job(1, "alice", "p1", NOW - 400 * DAY), 600).await;

    let scheduler = MaintenanceScheduler::new(
        env.dyn_repo(),
        env.clock.clone(),
        MaintenanceConfig::default(),
    );
    assert_eq!(scheduler.run_once().await.unwrap().deleted_jobs, 0);
    assert_eq!(env.repo.count_jobs(&admin(), &[]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduler_loop_stops_on_shutdown() {
    let env = TestEnv::new().await;
    let mut overdue = job(1, "alice", "p1", NOW - 2 * HOUR);
    overdue.walltime = HOUR;
    let id = env.repo.start(&overdue).await.unwrap();

    let scheduler = MaintenanceScheduler::new(
        env.dyn_repo(),
        env.clock.clone(),
        MaintenanceConfig {
            interval: Duration::from_millis(10),
            walltime_grace_secs: 0,
            retention_days: None,
        },
    );
    let (sender, token) = shutdown_channel();
    let handle = tokio::spawn(scheduler.run(token));

    // first tick fires immediately
    for _ in 0..100 {
        if env.repo.find_by_id(id).await.unwrap().state == JobState::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(env.repo.find_by_id(id).await.unwrap().state, JobState::Failed);

    sender.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler must stop after shutdown")
        .unwrap();
}
