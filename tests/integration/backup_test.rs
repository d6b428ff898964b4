//! Backup manager: expiration, restore outcomes, cleanup

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_test::{assert_err, assert_ok};

use versionsweep::backup::BackupManager;
use versionsweep::config::BackupConfig;
use versionsweep::domain::{BackupSummary, ExpirationUrgency, OrchestratorError};
use versionsweep::engine::{BackupEngine, EngineError};
use versionsweep::events::{Event, EventBus, NoticeLevel};

use crate::fakes::{backup_item, Calls, FakeEngine};

fn manager(engine: &Arc<FakeEngine>, events: &EventBus) -> BackupManager {
    let engine: Arc<dyn BackupEngine> = engine.clone();
    BackupManager::new(engine, events.clone(), BackupConfig::default())
}

fn engine_with_backup(created_days_ago: i64) -> Arc<FakeEngine> {
    FakeEngine::with_state(|s| {
        s.backup_summary = Some(BackupSummary {
            deployment_run_id: "run-1".to_string(),
            backup_created_at: Some(Utc::now() - Duration::days(created_days_ago)),
            expiration_date: None,
            item_count: 2,
        });
        s.backup_items = vec![backup_item("bk-1", "run-1"), backup_item("bk-2", "run-1")];
    })
}

fn notices(receiver: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<(NoticeLevel, String)> {
    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let Event::Notice { level, message, .. } = event {
            seen.push((level, message));
        }
    }
    seen
}

#[tokio::test]
async fn test_expiration_derived_from_creation_time() {
    let engine = engine_with_backup(25);
    let events = EventBus::new();
    let mut manager = manager(&engine, &events);

    manager.bind("run-1");
    manager.load().await.unwrap();

    assert!(manager.has_backup_data());
    assert_eq!(manager.restorable_count(), 2);
    let now = Utc::now();
    assert_eq!(manager.days_until_expiration(now), Some(5));
    assert_eq!(manager.urgency(now), Some(ExpirationUrgency::Urgent));
}

#[tokio::test]
async fn test_fresh_backup_is_in_warning_window() {
    let engine = engine_with_backup(0);
    let events = EventBus::new();
    let mut manager = manager(&engine, &events);

    manager.bind("run-1");
    manager.load().await.unwrap();

    assert_eq!(manager.urgency(Utc::now()), Some(ExpirationUrgency::Warning));
}

#[tokio::test]
async fn test_restore_all_reports_partial_success() {
    let engine = engine_with_backup(1);
    engine.update(|s| s.failing_restores = vec!["bk-2".to_string()]);
    let events = EventBus::new();
    let mut receiver = events.subscribe();
    let mut manager = manager(&engine, &events);

    manager.bind("run-1");
    let report = manager.restore_all().await.unwrap();

    assert!(report.is_partial());
    assert_eq!(report.message(), "Restored 1 items, 1 failed");
    assert_eq!(
        notices(&mut receiver),
        vec![(NoticeLevel::Warning, "Restored 1 items, 1 failed".to_string())]
    );
    // Reloaded after the mutation
    assert_eq!(manager.restorable_count(), 1);
}

#[tokio::test]
async fn test_restore_item_failure_is_a_result() {
    let engine = engine_with_backup(1);
    engine.update(|s| s.failing_restores = vec!["bk-1".to_string()]);
    let events = EventBus::new();
    let mut manager = manager(&engine, &events);

    manager.bind("run-1");
    let result = manager.restore_item("bk-1").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("Artifact is locked"));

    let err = assert_err!(manager.restore_item("bk-404").await);
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_cleanup_clears_local_state() {
    let engine = engine_with_backup(1);
    let events = EventBus::new();
    let mut receiver = events.subscribe();
    let mut manager = manager(&engine, &events);

    manager.bind("run-1");
    assert_ok!(manager.load().await);
    assert_ok!(manager.cleanup().await);

    assert!(manager.summary().is_none());
    assert!(manager.items().is_empty());
    assert!(!manager.has_backup_data());
    assert_eq!(Calls::get(&engine.calls.cleanup), 1);
    assert!(engine.get_backup_items("run-1").await.unwrap().is_empty());
    assert!(matches!(
        engine.get_backup_summary("run-1").await,
        Err(EngineError::NotFound(_))
    ));

    let first = receiver.try_recv().unwrap();
    assert!(matches!(first, Event::BackupCleared { ref run_id, .. } if run_id == "run-1"));
}

#[tokio::test]
async fn test_unbound_manager_rejects_actions() {
    let engine = engine_with_backup(1);
    let events = EventBus::new();
    let mut manager = manager(&engine, &events);

    assert!(matches!(manager.load().await, Err(OrchestratorError::NotFound(_))));
    assert!(matches!(manager.restore_all().await, Err(OrchestratorError::NotFound(_))));
    assert_eq!(Calls::get(&engine.calls.restore), 0);
}

#[tokio::test]
async fn test_rebinding_drops_loaded_data() {
    let engine = engine_with_backup(1);
    let events = EventBus::new();
    let mut manager = manager(&engine, &events);

    manager.bind("run-1");
    manager.load().await.unwrap();
    manager.bind("run-2");

    assert!(manager.summary().is_none());
    assert!(manager.items().is_empty());
    assert!(matches!(manager.load().await, Err(OrchestratorError::NotFound(_))));
}

#[tokio::test]
async fn test_diff_and_preview() {
    let engine = engine_with_backup(1);
    let events = EventBus::new();
    let manager = manager(&engine, &events);

    assert!(manager.diff_has_changes("bk-1").await.unwrap());
    assert!(!manager.diff_has_changes("bk-2").await.unwrap());
    let content = manager.preview("bk-2").await.unwrap();
    assert_eq!(content.full_name, "Class_bk-2");
}
