//! Serialized archiving worker on top of the SQLite repository

mod common;

use common::{job, TestEnv, HOUR, NOW};
use jobstore_core::application::{Archiver, ArchiverConfig};
use jobstore_core::domain::{Job, JobStatistics, MonitoringStatus};
use jobstore_core::port::archive_client::mocks::MockArchiveClient;
use jobstore_core::port::JobRepository;
use jobstore_core::AppError;
use jobstore_infra_archive::LocalArchiveClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

async fn finished_jobs(env: &TestEnv, count: i64) -> Vec<Job> {
    let mut jobs = Vec::new();
    for i in 0..count {
        let id = env
            .finished(job(1000 + i, "alice", "p1", NOW - HOUR), 1800)
            .await;
        jobs.push(env.repo.find_by_id(id).await.unwrap());
    }
    jobs
}

async fn status_of(env: &TestEnv, job: &Job) -> MonitoringStatus {
    env.repo.find_by_id(job.id).await.unwrap().monitoring_status
}

#[tokio::test]
async fn test_successful_archiving_stores_statistics() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::with_statistics(HashMap::from([(
        "flops_any".to_string(),
        JobStatistics {
            avg: 12.5,
            min: 1.0,
            max: 40.0,
        },
    )])));
    let archiver = Archiver::spawn(env.dyn_repo(), client.clone(), ArchiverConfig::default());

    let jobs = finished_jobs(&env, 1).await;
    archiver.trigger_archiving(jobs[0].clone()).await.unwrap();
    archiver.wait_for_archiving().await;

    let stored = env.repo.find_by_id(jobs[0].id).await.unwrap();
    assert_eq!(stored.monitoring_status, MonitoringStatus::ArchivingSuccessful);
    assert_eq!(stored.flops_any_avg, Some(12.5));
    assert_eq!(client.call_count(), 1);
    assert_eq!(archiver.pending(), 0);

    archiver.shutdown().await;
}

#[tokio::test]
async fn test_failed_archiving_leaves_statistics_untouched() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::new_fail("backend down"));
    let archiver = Archiver::spawn(env.dyn_repo(), client, ArchiverConfig::default());

    let jobs = finished_jobs(&env, 1).await;
    archiver.trigger_archiving(jobs[0].clone()).await.unwrap();
    archiver.wait_for_archiving().await;

    let stored = env.repo.find_by_id(jobs[0].id).await.unwrap();
    assert_eq!(stored.monitoring_status, MonitoringStatus::ArchivingFailed);
    assert_eq!(stored.flops_any_avg, None);

    archiver.shutdown().await;
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_queue() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::new_success());
    let archiver = Archiver::spawn(env.dyn_repo(), client.clone(), ArchiverConfig::default());

    let jobs = finished_jobs(&env, 3).await;
    client.fail_for(jobs[1].id);
    for job in &jobs {
        archiver.trigger_archiving(job.clone()).await.unwrap();
    }
    archiver.wait_for_archiving().await;

    assert_eq!(status_of(&env, &jobs[0]).await, MonitoringStatus::ArchivingSuccessful);
    assert_eq!(status_of(&env, &jobs[1]).await, MonitoringStatus::ArchivingFailed);
    assert_eq!(status_of(&env, &jobs[2]).await, MonitoringStatus::ArchivingSuccessful);

    archiver.shutdown().await;
}

#[tokio::test]
async fn test_archive_calls_never_overlap() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::new_delay(Duration::from_millis(20)));
    let archiver = Arc::new(Archiver::spawn(
        env.dyn_repo(),
        client.clone(),
        ArchiverConfig {
            queue_capacity: 2,
            timeout: None,
        },
    ));

    // concurrent producers, queue smaller than the batch
    let jobs = finished_jobs(&env, 8).await;
    let producers = jobs.iter().cloned().map(|job| {
        let archiver = Arc::clone(&archiver);
        tokio::spawn(async move { archiver.trigger_archiving(job).await })
    });
    for result in futures::future::join_all(producers).await {
        result.unwrap().unwrap();
    }
    archiver.wait_for_archiving().await;

    assert_eq!(client.call_count(), 8);
    assert_eq!(client.max_in_flight(), 1);
    for job in &jobs {
        assert_eq!(status_of(&env, job).await, MonitoringStatus::ArchivingSuccessful);
    }

    archiver.shutdown().await;
}

#[tokio::test]
async fn test_jobs_are_archived_in_trigger_order() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::new_success());
    let archiver = Archiver::spawn(env.dyn_repo(), client.clone(), ArchiverConfig::default());

    let jobs = finished_jobs(&env, 4).await;
    for job in jobs.iter().rev() {
        archiver.trigger_archiving(job.clone()).await.unwrap();
    }
    archiver.wait_for_archiving().await;

    let expected: Vec<i64> = jobs.iter().rev().map(|j| j.id).collect();
    assert_eq!(client.processed(), expected);

    archiver.shutdown().await;
}

#[tokio::test]
async fn test_timeout_marks_job_failed() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::new_delay(Duration::from_secs(5)));
    let archiver = Archiver::spawn(
        env.dyn_repo(),
        client.clone(),
        ArchiverConfig {
            queue_capacity: 4,
            timeout: Some(Duration::from_millis(50)),
        },
    );

    let jobs = finished_jobs(&env, 1).await;
    archiver.trigger_archiving(jobs[0].clone()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), archiver.wait_for_archiving())
        .await
        .expect("timed out archive call must still settle");

    assert_eq!(status_of(&env, &jobs[0]).await, MonitoringStatus::ArchivingFailed);
    // the abandoned call no longer counts as running
    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.max_in_flight(), 1);

    archiver.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_queue_then_rejects() {
    let env = TestEnv::new().await;
    let client = Arc::new(MockArchiveClient::new_delay(Duration::from_millis(10)));
    let archiver = Archiver::spawn(env.dyn_repo(), client.clone(), ArchiverConfig::default());

    let jobs = finished_jobs(&env, 5).await;
    for job in &jobs[..4] {
        archiver.trigger_archiving(job.clone()).await.unwrap();
    }
    archiver.shutdown().await;

    assert_eq!(client.call_count(), 4);
    for job in &jobs[..4] {
        assert!(status_of(&env, job).await.is_terminal());
    }

    let rejected = archiver.trigger_archiving(jobs[4].clone()).await;
    assert!(matches!(rejected, Err(AppError::InvalidState(_))));
    assert_eq!(archiver.pending(), 0);
    assert_eq!(
        status_of(&env, &jobs[4]).await,
        MonitoringStatus::RunningOrArchiving
    );

    // second shutdown is a no-op
    archiver.shutdown().await;
}

#[tokio::test]
async fn test_local_archive_writes_job_directory() {
    let env = TestEnv::new().await;
    let root = std::env::temp_dir().join(format!("jobstore-archive-it-{}", uuid::Uuid::new_v4()));
    let client = Arc::new(LocalArchiveClient::new(root.clone()));
    let archiver = Archiver::spawn(env.dyn_repo(), client.clone(), ArchiverConfig::default());

    let mut new = job(123_456, "alice", "p1", NOW - HOUR);
    new.meta_data.insert("jobName".into(), "lammps".into());
    let id = env.finished(new, 1800).await;
    let job = env.repo.find_by_id(id).await.unwrap();

    archiver.trigger_archiving(job.clone()).await.unwrap();
    archiver.wait_for_archiving().await;

    assert_eq!(status_of(&env, &job).await, MonitoringStatus::ArchivingSuccessful);
    let meta_file = client.job_dir(&job).join("meta.json");
    let written: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&meta_file).await.unwrap()).unwrap();
    assert_eq!(written["meta_data"]["jobName"], "lammps");
    assert_eq!(written["duration"], 1800);

    archiver.shutdown().await;
    let _ = tokio::fs::remove_dir_all(root).await;
}
