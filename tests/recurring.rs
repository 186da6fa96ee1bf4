//! Recurring Planner Integration Tests
//!
//! Planning is idempotent per window and tolerates concurrent runs.

mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use common::{foo_v1, Harness};
use processmanager::core::EngineSettings;
use processmanager::domain::{
    OperatingIdentity, OrchestrationDescription, OrchestrationDescriptionUniqueName,
    OrchestrationInstanceLifecycleState,
};
use processmanager::persistence::{OrchestrationInstanceFilter, SqliteRepository};

fn hourly_name() -> OrchestrationDescriptionUniqueName {
    OrchestrationDescriptionUniqueName::new("Hourly", 1)
}

fn hourly() -> OrchestrationDescription {
    let mut description = OrchestrationDescription::new(hourly_name(), true, "Hourly_V1")
        .with_recurring_cron_expression("0 * * * *");
    description.append_step_description("Run");
    description
}

async fn planned(harness: &Harness) -> Vec<processmanager::OrchestrationInstance> {
    harness
        .queries
        .search(&OrchestrationInstanceFilter::for_description(&hourly_name()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_planning_is_idempotent_within_a_window() {
    let harness = Harness::new();
    harness.declare(vec![hourly(), foo_v1()]).await;
    let now = Utc.with_ymd_and_hms(2025, 4, 1, 12, 30, 0).unwrap();
    let planner = harness.planner();

    let first = planner.plan(now).await.unwrap();
    assert_eq!(first.created.len(), 24);
    assert_eq!(first.already_planned, 0);

    for _ in 0..3 {
        let again = planner.plan(now).await.unwrap();
        assert!(again.created.is_empty());
        assert_eq!(again.already_planned, 24);
    }

    let instances = planned(&harness).await;
    assert_eq!(instances.len(), 24);
    assert!(instances.iter().all(|i| {
        i.lifecycle().state() == OrchestrationInstanceLifecycleState::Scheduled
            && i.is_recurring_occurrence()
            && *i.lifecycle().created_by() == OperatingIdentity::system()
    }));
    assert_eq!(
        instances.iter().filter_map(|i| i.run_at()).min(),
        Some(Utc.with_ymd_and_hms(2025, 4, 1, 13, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_advancing_the_window_plans_only_new_fire_times() {
    let harness = Harness::new();
    harness.declare(vec![hourly()]).await;
    let now = Utc.with_ymd_and_hms(2025, 4, 1, 12, 30, 0).unwrap();
    let planner = harness.planner();

    planner.plan(now).await.unwrap();
    let later = planner.plan(now + Duration::hours(3)).await.unwrap();
    assert_eq!(later.created.len(), 3);
    assert_eq!(planned(&harness).await.len(), 27);
}

#[tokio::test]
async fn test_manually_scheduled_fire_time_is_not_duplicated() {
    let harness = Harness::new();
    harness.declare(vec![hourly()]).await;
    let fire_time = Utc.with_ymd_and_hms(2025, 4, 1, 14, 0, 0).unwrap();

    harness
        .manager
        .schedule_new_orchestration_instance(
            OperatingIdentity::system(),
            &hourly_name(),
            &(),
            fire_time,
            &[],
        )
        .await
        .unwrap();

    let outcome = harness.planner().plan(common::start_of_test()).await.unwrap();
    assert_eq!(outcome.already_planned, 1);
    assert_eq!(planned(&harness).await.len(), 24);
}

#[tokio::test]
async fn test_concurrent_planning_creates_each_fire_time_once() {
    let temp = TempDir::new().unwrap();
    let repository = SqliteRepository::open(&temp.path().join("pm.db")).unwrap();
    let settings = EngineSettings {
        look_ahead_hours: 6,
        ..EngineSettings::default()
    };
    let harness = Harness::with(Arc::new(repository), settings);
    harness.declare(vec![hourly()]).await;

    let now = Utc.with_ymd_and_hms(2025, 4, 1, 12, 30, 0).unwrap();
    let (planner_a, planner_b) = (harness.planner(), harness.planner());
    let (a, b) = tokio::join!(planner_a.plan(now), planner_b.plan(now));
    let created = a.unwrap().created.len() + b.unwrap().created.len();

    assert_eq!(created, 6);
    assert_eq!(planned(&harness).await.len(), 6);
}

#[tokio::test]
async fn test_due_instances_are_handed_off_and_activated_once() {
    let harness = Harness::new();
    harness.declare(vec![hourly()]).await;
    let now = common::start_of_test();
    harness.planner().plan(now).await.unwrap();

    let due = harness
        .manager
        .activate_due_scheduled_instances(now + Duration::minutes(90))
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(harness.substrate.started(), due);

    // A duplicate activation is rejected by the transition guard
    harness.progress.transition_to_running(due[0]).await.unwrap();
    let err = harness.progress.transition_to_running(due[0]).await.unwrap_err();
    assert!(err.is_invalid_transition());
}
