//! Scan monitor poll loop

use std::sync::Arc;
use std::time::Duration;

use versionsweep::domain::{OrchestratorError, ScanRequest, ScanStatus};
use versionsweep::engine::{EngineError, ScanEngine};
use versionsweep::monitor::{ScanMonitor, ScanUpdate};

use crate::fakes::{completed_scan, scan, Calls, FakeEngine, POLL_MS};

fn monitor(engine: &Arc<FakeEngine>) -> ScanMonitor {
    let engine: Arc<dyn ScanEngine> = engine.clone();
    ScanMonitor::new(engine, Duration::from_millis(POLL_MS), 10)
}

fn request() -> ScanRequest {
    ScanRequest::new(vec!["ApexClass".to_string()], 65.0)
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_completed_then_stops() {
    let engine = FakeEngine::new();
    engine.script(vec![
        Ok(Some(scan(ScanStatus::Running))),
        Ok(Some(scan(ScanStatus::Running))),
        Ok(Some(completed_scan(3))),
    ]);
    let mut monitor = monitor(&engine);

    let started = monitor.start_scan(&request()).await.unwrap();
    assert_eq!(started.status, ScanStatus::Queued);
    assert!(monitor.is_polling());

    let mut seen = Vec::new();
    while let Some(update) = monitor.next_update().await {
        seen.push(update);
    }

    assert_eq!(seen.len(), 3);
    assert!(matches!(&seen[2], ScanUpdate::Status(s) if s.status == ScanStatus::Completed));
    assert!(!monitor.is_polling());
    assert_eq!(monitor.current().unwrap().findings_count, 3);

    // No further reads once a terminal status was observed
    tokio::time::sleep(Duration::from_millis(POLL_MS * 5)).await;
    assert_eq!(Calls::get(&engine.calls.get_status), 3);
}

#[tokio::test(start_paused = true)]
async fn test_first_poll_waits_one_interval() {
    let engine = FakeEngine::new();
    engine.script(vec![Ok(Some(scan(ScanStatus::Running)))]);
    let mut monitor = monitor(&engine);

    monitor.start_scan(&request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(POLL_MS - 100)).await;
    assert_eq!(Calls::get(&engine.calls.get_status), 0);

    let update = monitor.next_update().await.unwrap();
    assert_eq!(update.scan_id(), "scan-1");
    assert_eq!(Calls::get(&engine.calls.get_status), 1);
}

#[tokio::test(start_paused = true)]
async fn test_removed_scan_clears_current() {
    let engine = FakeEngine::new();
    engine.script(vec![Ok(None)]);
    let mut monitor = monitor(&engine);

    monitor.start_scan(&request()).await.unwrap();
    let update = monitor.next_update().await.unwrap();

    assert_eq!(update, ScanUpdate::Removed("scan-1".to_string()));
    assert!(monitor.current().is_none());
    assert!(!monitor.is_polling());
    assert!(monitor.next_update().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_poll_error_stops_without_retry() {
    let engine = FakeEngine::new();
    engine.script(vec![Err(EngineError::Transport("connection reset".to_string()))]);
    let mut monitor = monitor(&engine);

    monitor.start_scan(&request()).await.unwrap();
    let update = monitor.next_update().await.unwrap();

    match update {
        ScanUpdate::PollFailed { error, .. } => {
            assert!(matches!(error, OrchestratorError::TransientPoll(_)))
        }
        other => panic!("unexpected update: {:?}", other),
    }
    assert!(!monitor.is_polling());

    tokio::time::sleep(Duration::from_millis(POLL_MS * 5)).await;
    assert_eq!(Calls::get(&engine.calls.get_status), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_discards_updates_from_old_loop() {
    let engine = FakeEngine::new();
    engine.script(vec![Ok(Some(scan(ScanStatus::Running)))]);
    let mut monitor = monitor(&engine);

    monitor.start_polling("scan-old");
    // The old loop delivers one update that nobody consumes
    tokio::time::sleep(Duration::from_millis(POLL_MS + 100)).await;
    assert_eq!(Calls::get(&engine.calls.get_status), 1);

    monitor.start_polling("scan-new");
    assert_eq!(monitor.polling_scan_id(), Some("scan-new"));

    let update = monitor.next_update().await.unwrap();
    assert_eq!(update.scan_id(), "scan-new");
}

#[tokio::test(start_paused = true)]
async fn test_invalid_request_never_reaches_engine() {
    let engine = FakeEngine::new();
    let mut monitor = monitor(&engine);

    let err = monitor
        .start_scan(&ScanRequest::new(Vec::new(), 65.0))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(Calls::get(&engine.calls.start_scan), 0);
    assert!(!monitor.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling_even_when_engine_fails() {
    let engine = FakeEngine::new();
    engine.script(vec![Ok(Some(scan(ScanStatus::Running)))]);
    engine.update(|s| {
        s.cancel_error = Some(EngineError::Api {
            status: 409,
            message: "Scan already finishing".to_string(),
        })
    });
    let mut monitor = monitor(&engine);

    monitor.start_scan(&request()).await.unwrap();
    let err = monitor.cancel_scan().await.unwrap_err();

    assert_eq!(err.user_message(), "Scan already finishing");
    assert!(!monitor.is_polling());
    tokio::time::sleep(Duration::from_millis(POLL_MS * 3)).await;
    assert_eq!(Calls::get(&engine.calls.get_status), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_marks_scan_cancelled() {
    let engine = FakeEngine::new();
    let mut monitor = monitor(&engine);

    monitor.start_scan(&request()).await.unwrap();
    monitor.cancel_scan().await.unwrap();

    assert_eq!(monitor.current().unwrap().status, ScanStatus::Cancelled);
    assert_eq!(Calls::get(&engine.calls.cancel), 1);
}

#[tokio::test(start_paused = true)]
async fn test_selecting_terminal_scan_does_not_poll() {
    let engine = FakeEngine::new();
    engine.script(vec![Ok(Some(completed_scan(2)))]);
    let mut monitor = monitor(&engine);

    let selected = monitor.select_scan("scan-9").await.unwrap();
    assert_eq!(selected.id, "scan-9");
    assert!(!monitor.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_selecting_missing_scan_is_not_found() {
    let engine = FakeEngine::new();
    engine.script(vec![Ok(None)]);
    let mut monitor = monitor(&engine);

    let err = monitor.select_scan("scan-9").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
