//! Role-based restriction of every job-reading operation

mod common;

use common::{admin, job, plain_user, TestEnv, NOW};
use jobstore_core::domain::{Aggregate, JobFilter, RequestContext, Role, StringInput, User};
use jobstore_core::port::{ColumnLookup, JobRepository};

async fn seeded() -> TestEnv {
    let env = TestEnv::new().await;
    env.repo.start(&job(1, "alice", "p1", NOW)).await.unwrap();
    env.repo.start(&job(2, "alice", "p2", NOW)).await.unwrap();
    env.repo.start(&job(3, "bob", "p2", NOW)).await.unwrap();
    env.repo.start(&job(4, "carol", "p3", NOW)).await.unwrap();
    env
}

#[tokio::test]
async fn test_anonymous_and_roleless_callers_are_forbidden() {
    let env = seeded().await;
    let anonymous = RequestContext::anonymous();
    let roleless = RequestContext::for_user(User::new("eve", vec![]));

    for ctx in [&anonymous, &roleless] {
        assert!(env
            .repo
            .query_jobs(ctx, &[], None, None)
            .await
            .unwrap_err()
            .is_forbidden());
        assert!(env.repo.count_jobs(ctx, &[]).await.unwrap_err().is_forbidden());
        assert!(env
            .repo
            .count_grouped_jobs(ctx, Aggregate::User, &[], None, None)
            .await
            .unwrap_err()
            .is_forbidden());
        assert!(env
            .repo
            .jobs_statistics(ctx, &[], None)
            .await
            .unwrap_err()
            .is_forbidden());
    }
}

#[tokio::test]
async fn test_plain_user_sees_own_and_project_jobs() {
    let env = seeded().await;

    let alice = plain_user("alice", &[]);
    let own: Vec<i64> = env
        .repo
        .query_jobs(&alice, &[], None, None)
        .await
        .unwrap()
        .iter()
        .map(|j| j.job_id)
        .collect();
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|id| [1, 2].contains(id)));

    // project membership adds bob's p2 job, never carol's
    let manager_of_p2 = plain_user("alice", &["p2"]);
    assert_eq!(env.repo.count_jobs(&manager_of_p2, &[]).await.unwrap(), 3);

    let counts = env
        .repo
        .count_grouped_jobs(&manager_of_p2, Aggregate::User, &[], None, None)
        .await
        .unwrap();
    assert_eq!(counts.get("alice"), Some(&2));
    assert_eq!(counts.get("bob"), Some(&1));
    assert!(!counts.contains_key("carol"));
}

#[tokio::test]
async fn test_filters_cannot_widen_the_restriction() {
    let env = seeded().await;
    let alice = plain_user("alice", &[]);
    let carol_filter = JobFilter {
        user: Some(StringInput::eq("carol")),
        ..Default::default()
    };
    assert_eq!(env.repo.count_jobs(&alice, &[carol_filter]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_elevated_roles_see_everything() {
    let env = seeded().await;
    assert_eq!(env.repo.count_jobs(&admin(), &[]).await.unwrap(), 4);

    for role in [Role::Support, Role::Manager, Role::Api] {
        let ctx = RequestContext::for_user(User::new("svc", vec![role]));
        assert_eq!(env.repo.count_jobs(&ctx, &[]).await.unwrap(), 4);
    }
}

#[tokio::test]
async fn test_column_lookups_require_elevation() {
    let env = seeded().await;
    let user = User::new("alice", vec![Role::User]);

    assert!(env
        .repo
        .find_column_value(Some(&user), "alice", ColumnLookup::JobUser, false)
        .await
        .unwrap_err()
        .is_forbidden());
    assert!(env
        .repo
        .find_column_values(Some(&user), "p", ColumnLookup::JobProject)
        .await
        .unwrap_err()
        .is_forbidden());
    assert!(env
        .repo
        .find_column_value(None, "alice", ColumnLookup::JobUser, false)
        .await
        .unwrap_err()
        .is_forbidden());

    let support = User::new("helpdesk", vec![Role::Support]);
    let projects = env
        .repo
        .find_column_values(Some(&support), "p", ColumnLookup::JobProject)
        .await
        .unwrap();
    assert_eq!(projects.len(), 3);
}

#[tokio::test]
async fn test_anonymous_search_is_forbidden_but_job_ids_pass() {
    let env = seeded().await;
    let anonymous = RequestContext::anonymous();

    assert!(env
        .repo
        .find_user_or_project_or_jobname(&anonymous, "alice")
        .await
        .unwrap_err()
        .is_forbidden());
    assert!(env
        .repo
        .find_user_or_project_or_jobname(&anonymous, "12")
        .await
        .is_ok());
}
