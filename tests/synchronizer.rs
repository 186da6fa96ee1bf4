//! Synchronizer Integration Tests
//!
//! Declared descriptions against persisted ones, breaking-change
//! detection and readiness.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{declared, foo_v1, foo_v1_name, Harness};
use processmanager::core::{EngineSettings, SynchronizationState};
use processmanager::domain::OrchestrationDescription;
use processmanager::persistence::{InMemoryRepository, OrchestrationRepository, SqliteRepository};
use processmanager::{processes, OrchestrationError};

fn foo_v1_without_second_step() -> OrchestrationDescription {
    let mut description = OrchestrationDescription::new(foo_v1_name(), true, "Foo_V1");
    description.append_step_description("Calculate");
    description
}

#[tokio::test]
async fn test_unchanged_description_synchronizes_idempotently() {
    let temp = TempDir::new().unwrap();
    let repository = Arc::new(SqliteRepository::open(&temp.path().join("pm.db")).unwrap());
    let harness = Harness::with(repository, EngineSettings::default());
    let synchronizer = harness.synchronizer();

    let first = synchronizer.synchronize(&[declared(foo_v1())]).await.unwrap();
    assert_eq!(first.inserted, vec![foo_v1_name()]);
    let persisted = harness.repository.get_description(&foo_v1_name()).await.unwrap().unwrap();

    let second = synchronizer.synchronize(&[declared(foo_v1())]).await.unwrap();
    assert!(second.inserted.is_empty());
    assert!(second.updated.is_empty());
    assert!(second.overwritten.is_empty());
    assert_eq!(second.unchanged, vec![foo_v1_name()]);

    let again = harness.repository.get_description(&foo_v1_name()).await.unwrap().unwrap();
    assert_eq!(
        serde_json::to_string(&again).unwrap(),
        serde_json::to_string(&persisted).unwrap()
    );
}

#[tokio::test]
async fn test_removed_step_is_a_refused_breaking_change() {
    let harness = Harness::new();
    harness.declare(vec![foo_v1()]).await;
    let persisted = harness.repository.get_description(&foo_v1_name()).await.unwrap().unwrap();

    let err = harness
        .synchronizer()
        .synchronize(&[declared(foo_v1_without_second_step())])
        .await
        .unwrap_err();

    match err {
        OrchestrationError::BreakingChangeDetected { reports } => {
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].unique_name, foo_v1_name());
            assert_eq!(reports[0].changed_properties, vec!["Steps"]);
        }
        other => panic!("unexpected error: {}", other),
    }

    let unchanged = harness.repository.get_description(&foo_v1_name()).await.unwrap().unwrap();
    assert_eq!(unchanged, persisted);
}

#[tokio::test]
async fn test_override_flag_overwrites_breaking_change() {
    let settings = EngineSettings {
        allow_breaking_changes: true,
        ..EngineSettings::default()
    };
    let harness = Harness::with(Arc::new(InMemoryRepository::new()), settings);
    harness.declare(vec![foo_v1()]).await;
    let original_id = harness
        .repository
        .get_description(&foo_v1_name())
        .await
        .unwrap()
        .unwrap()
        .id();

    let outcome = harness
        .synchronizer()
        .synchronize(&[declared(foo_v1_without_second_step())])
        .await
        .unwrap();
    assert_eq!(outcome.overwritten.len(), 1);
    assert_eq!(outcome.overwritten[0].changed_properties, vec!["Steps"]);

    let stored = harness.repository.get_description(&foo_v1_name()).await.unwrap().unwrap();
    assert_eq!(stored.steps().len(), 1);
    assert_eq!(stored.id(), original_id);
}

#[tokio::test]
async fn test_non_breaking_change_updates_in_place() {
    let harness = Harness::new();
    harness.declare(vec![foo_v1()]).await;

    let outcome = harness
        .synchronizer()
        .synchronize(&[declared(foo_v1().with_recurring_cron_expression("0 6 * * *"))])
        .await
        .unwrap();
    assert_eq!(outcome.updated, vec![foo_v1_name()]);

    let stored = harness.repository.get_description(&foo_v1_name()).await.unwrap().unwrap();
    assert_eq!(stored.recurring_cron_expression(), Some("0 6 * * *"));
}

#[tokio::test]
async fn test_readiness_reflects_refused_synchronization() {
    let harness = Harness::new();
    harness.declare(vec![foo_v1()]).await;

    let state = SynchronizationState::new();
    let result = harness
        .synchronizer()
        .synchronize_at_startup(&[declared(foo_v1_without_second_step())], &state)
        .await;
    assert!(result.is_err());

    let readiness = state.readiness();
    assert!(!readiness.ready);
    assert_eq!(readiness.diagnostics.len(), 1);
    assert!(readiness.diagnostics[0].contains("Steps"));
}

#[tokio::test]
async fn test_hosted_process_modules_synchronize() {
    let harness = Harness::new();
    let state = SynchronizationState::new();
    let outcome = harness
        .synchronizer()
        .synchronize_at_startup(&processes::all_builders(), &state)
        .await
        .unwrap();

    assert_eq!(outcome.inserted.len(), 3);
    assert!(state.is_ready());

    let descriptions = harness.repository.list_descriptions().await.unwrap();
    assert!(descriptions.iter().all(|d| d.host_name() == "processmanager"));
}
