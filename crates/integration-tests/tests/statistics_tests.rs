//! Grouped counts, per-subcluster core hours and job statistics
//!
//! Topology: fritz/main has 72 cores per node, fritz/spr has 104.

mod common;

use common::{admin, job, plain_user, TestEnv, HOUR, NOW};
use jobstore_core::domain::{Aggregate, HistoPoint, JobFilter, StringInput, Weight};
use jobstore_core::port::JobRepository;

/// alice: 2 nodes x 2h on main, 1 node x 1h on spr; bob: 1 node x 100s on main
async fn seeded() -> TestEnv {
    let env = TestEnv::new().await;

    let mut a = job(1, "alice", "p1", NOW - 10 * HOUR);
    a.num_nodes = 2;
    env.finished(a, 7200).await;

    let mut b = job(2, "alice", "p1", NOW - 9 * HOUR);
    b.subcluster = "spr".into();
    env.finished(b, 3600).await;

    env.finished(job(3, "bob", "p2", NOW - 8 * HOUR), 100).await;
    env
}

async fn add_running_bob(env: &TestEnv) {
    env.repo
        .start(&job(4, "bob", "p2", NOW - 1800))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_count_grouped_by_weight() {
    let env = seeded().await;
    let ctx = admin();

    let jobs = env
        .repo
        .count_grouped_jobs(&ctx, Aggregate::User, &[], None, None)
        .await
        .unwrap();
    assert_eq!(jobs["alice"], 2);
    assert_eq!(jobs["bob"], 1);

    let nodes = env
        .repo
        .count_grouped_jobs(&ctx, Aggregate::User, &[], Some(Weight::NodeCount), None)
        .await
        .unwrap();
    assert_eq!(nodes["alice"], 3);
    assert_eq!(nodes["bob"], 1);

    // (2 * 7200 + 3600) / 3600
    let node_hours = env
        .repo
        .count_grouped_jobs(&ctx, Aggregate::User, &[], Some(Weight::NodeHours), None)
        .await
        .unwrap();
    assert_eq!(node_hours["alice"], 5);

    let top = env
        .repo
        .count_grouped_jobs(&ctx, Aggregate::Project, &[], None, Some(1))
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top["p1"], 2);
}

#[tokio::test]
async fn test_core_hours_merge_subclusters() {
    let env = seeded().await;

    // main: 2 * 7200 * 72 / 3600 = 288, spr: 3600 * 104 / 3600 = 104
    let core_hours = env
        .repo
        .count_grouped_jobs(&admin(), Aggregate::User, &[], Some(Weight::CoreHours), None)
        .await
        .unwrap();
    assert_eq!(core_hours["alice"], 392);
    assert_eq!(core_hours["bob"], 2);

    let limited = env
        .repo
        .count_grouped_jobs(&admin(), Aggregate::User, &[], Some(Weight::CoreHours), Some(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited["alice"], 392);
}

#[tokio::test]
async fn test_weights_use_elapsed_time_of_running_jobs() {
    let env = seeded().await;
    add_running_bob(&env).await;

    // (100 + 1800) node-seconds
    let node_hours = env
        .repo
        .count_grouped_jobs(&admin(), Aggregate::User, &[], Some(Weight::NodeHours), None)
        .await
        .unwrap();
    assert_eq!(node_hours["bob"], 1);

    let core_hours = env
        .repo
        .count_grouped_jobs(&admin(), Aggregate::User, &[], Some(Weight::CoreHours), None)
        .await
        .unwrap();
    assert_eq!(core_hours["bob"], 38);
}

#[tokio::test]
async fn test_statistics_totals() {
    let env = seeded().await;

    let stats = env.repo.jobs_statistics(&admin(), &[], None).await.unwrap();
    assert_eq!(stats.len(), 1);
    let all = &stats[0];
    assert_eq!(all.id, "");
    assert_eq!(all.total_jobs, 3);
    // main: round(7300 / 3600) = 2, spr: 1
    assert_eq!(all.total_walltime, 3);
    // main: 14500 * 72 / 3600 = 290, spr: 104
    assert_eq!(all.total_core_hours, 394);
    assert_eq!(all.short_jobs, 1);
    assert!(all.hist_duration.is_none());
    assert!(all.hist_num_nodes.is_none());
}

#[tokio::test]
async fn test_statistics_without_matches_still_report_totals() {
    let env = seeded().await;
    let filter = JobFilter {
        cluster: Some(StringInput::eq("alex")),
        ..Default::default()
    };

    let stats = env.repo.jobs_statistics(&admin(), &[filter], None).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_jobs, 0);
    assert_eq!(stats[0].total_core_hours, 0);
}

#[tokio::test]
async fn test_statistics_grouped_by_user_with_names() {
    let env = seeded().await;
    env.add_user("alice", "Alice Doe").await;

    let stats = env
        .repo
        .jobs_statistics(&admin(), &[], Some(Aggregate::User))
        .await
        .unwrap();
    assert_eq!(stats.len(), 2);

    let alice = &stats[0];
    assert_eq!(alice.id, "alice");
    assert_eq!(alice.name.as_deref(), Some("Alice Doe"));
    assert_eq!(alice.total_jobs, 2);
    assert_eq!(alice.total_walltime, 3);
    assert_eq!(alice.total_core_hours, 392);
    assert_eq!(alice.short_jobs, 0);

    // no user table entry
    let bob = &stats[1];
    assert_eq!(bob.id, "bob");
    assert_eq!(bob.name.as_deref(), Some("-"));
    assert_eq!(bob.short_jobs, 1);
    assert_eq!(bob.total_core_hours, 2);
}

#[tokio::test]
async fn test_plain_user_gets_placeholder_names() {
    let env = seeded().await;
    env.add_user("alice", "Alice Doe").await;

    let stats = env
        .repo
        .jobs_statistics(&plain_user("alice", &[]), &[], Some(Aggregate::User))
        .await
        .unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].name.as_deref(), Some("-"));
}

#[tokio::test]
async fn test_histograms_only_when_requested() {
    let env = seeded().await;

    let ctx = admin().with_fields(["histDuration"]);
    let stats = env.repo.jobs_statistics(&ctx, &[], None).await.unwrap();
    assert_eq!(
        stats[0].hist_duration.as_deref(),
        Some(
            &[
                HistoPoint { value: 0, count: 1 },
                HistoPoint { value: 1, count: 1 },
                HistoPoint { value: 2, count: 1 },
            ][..]
        )
    );
    assert!(stats[0].hist_num_nodes.is_none());

    let ctx = admin().with_fields(["histNumNodes"]);
    let grouped = env
        .repo
        .jobs_statistics(&ctx, &[], Some(Aggregate::User))
        .await
        .unwrap();
    assert_eq!(
        grouped[0].hist_num_nodes.as_deref(),
        Some(
            &[
                HistoPoint { value: 1, count: 1 },
                HistoPoint { value: 2, count: 1 },
            ][..]
        )
    );
    assert_eq!(
        grouped[1].hist_num_nodes.as_deref(),
        Some(&[HistoPoint { value: 1, count: 1 }][..])
    );
}
