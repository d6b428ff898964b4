//! Change plan selection, validate-then-deploy and failure detail

use std::sync::Arc;
use std::time::Duration;

use versionsweep::domain::{
    ApplyStatus, CreatePlanRequest, Eligibility, EligibilityFilter, IncrementPolicy, ItemError,
    OrchestratorError, PlanStatus, RunStatus, TestPolicy, ValidationStatus,
};
use versionsweep::engine::{DeployEngine, EngineError, PlanEngine};
use versionsweep::plan::{ChangePlanner, DEPLOYMENT_FAILED};

use crate::fakes::{plan, standard_items, Calls, FakeEngine};

fn planner(engine: &Arc<FakeEngine>) -> ChangePlanner {
    let plan_engine: Arc<dyn PlanEngine> = engine.clone();
    let deploy_engine: Arc<dyn DeployEngine> = engine.clone();
    ChangePlanner::new(plan_engine, deploy_engine, Duration::from_secs(300), 3)
}

fn draft_engine() -> Arc<FakeEngine> {
    FakeEngine::with_state(|s| {
        s.plan = Some(plan(PlanStatus::Draft));
        s.items = standard_items();
    })
}

async fn loaded(engine: &Arc<FakeEngine>) -> ChangePlanner {
    let mut planner = planner(engine);
    planner.load_plan("plan-1").await.unwrap();
    planner
}

#[tokio::test]
async fn test_create_plan_loads_items_in_unit_order() {
    let engine = draft_engine();
    let mut planner = planner(&engine);

    let request = CreatePlanRequest {
        scan_id: "scan-7".to_string(),
        target_api_version: 62.0,
        increment_policy: IncrementPolicy::AllowJumps,
        validate_only: true,
        test_policy: TestPolicy::NoTestRun,
    };
    let plan = planner.create_plan(&request).await.unwrap();

    assert_eq!(plan.source_scan_id, "scan-7");
    let units: Vec<u32> = planner.items().iter().map(|i| i.unit_number).collect();
    assert_eq!(units, vec![1, 2, 3]);
    assert_eq!(planner.eligible_count(), 2);
    assert_eq!(planner.blocked_count(), 1);
}

#[tokio::test]
async fn test_create_plan_without_scan_is_not_found() {
    let engine = draft_engine();
    let mut planner = planner(&engine);

    let request = CreatePlanRequest {
        scan_id: String::new(),
        target_api_version: 65.0,
        increment_policy: IncrementPolicy::IncrementalOnly,
        validate_only: true,
        test_policy: TestPolicy::RunSpecifiedTests,
    };
    let err = planner.create_plan(&request).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert_eq!(Calls::get(&engine.calls.create_plan), 0);
}

#[tokio::test]
async fn test_blocked_items_cannot_be_selected() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    assert_eq!(planner.select_items(["i3", "missing"]), 0);
    assert!(!planner.can_validate());

    let err = planner.validate_selected().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(Calls::get(&engine.calls.validate), 0);

    let blocked: Vec<_> = planner
        .filtered_items(EligibilityFilter::Only(Eligibility::Blocked))
        .collect();
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].block_reason.is_some());
}

#[tokio::test]
async fn test_validate_then_deploy() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    assert_eq!(planner.select_all_eligible(), 2);
    assert!(!planner.can_deploy());

    let result = planner.validate_selected().await.unwrap();
    assert_eq!(result.validated_ids, vec!["i1".to_string(), "i2".to_string()]);
    assert_eq!(planner.status(), Some(PlanStatus::Validated));
    assert!(planner.is_validation_complete());
    assert!(planner.can_deploy());

    let run = planner.deploy(true).await.unwrap();
    assert_eq!(run.id, "run-1");
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(planner.status(), Some(PlanStatus::Executing));

    let request = engine.state.lock().unwrap().last_execute.clone().unwrap();
    assert_eq!(request.item_ids, vec!["i1".to_string(), "i2".to_string()]);
    assert!(request.create_backup);
}

#[tokio::test]
async fn test_selection_change_requires_new_validation() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap();

    // Same selection again keeps the validation
    planner.select_items(["i2", "i1"]);
    assert!(planner.is_validation_complete());

    planner.select_items(["i1"]);
    assert!(!planner.is_validation_complete());
    assert_eq!(planner.status(), Some(PlanStatus::Ready));

    let err = planner.deploy(false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(Calls::get(&engine.calls.execute), 0);
}

#[tokio::test]
async fn test_backup_deploy_with_empty_selection_fails_before_remote() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    let err = planner.deploy(true).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(Calls::get(&engine.calls.execute), 0);
    assert_eq!(planner.status(), Some(PlanStatus::Draft));
}

#[tokio::test]
async fn test_validation_with_item_errors_still_completes() {
    let engine = draft_engine();
    engine.update(|s| {
        s.validation_errors = vec![ItemError {
            item_id: "i2".to_string(),
            full_name: Some("Class_i2".to_string()),
            message: "Method does not exist".to_string(),
        }]
    });
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    let result = planner.validate_selected().await.unwrap();

    assert!(result.has_errors());
    assert!(planner.is_validation_complete());
    let i2 = planner.items().iter().find(|i| i.id == "i2").unwrap();
    assert_eq!(i2.validation_status, ValidationStatus::Failed);
    assert_eq!(i2.error_details.as_deref(), Some("Method does not exist"));
    let i1 = planner.items().iter().find(|i| i.id == "i1").unwrap();
    assert_eq!(i1.validation_status, ValidationStatus::Passed);
}

#[tokio::test]
async fn test_deploy_failure_uses_engine_message() {
    let engine = draft_engine();
    engine.update(|s| {
        s.execute_error = Some(EngineError::Api {
            status: 400,
            message: "Deploy limit exceeded".to_string(),
        })
    });
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap();
    let err = planner.deploy(false).await.unwrap_err();

    assert_eq!(err.user_message(), "Deploy limit exceeded");
    assert_eq!(planner.status(), Some(PlanStatus::Failed));
    assert_eq!(planner.failure_detail(), Some("Deploy limit exceeded"));
    assert!(planner.run().is_none());
}

#[tokio::test]
async fn test_failure_detail_prefers_item_errors() {
    let engine = draft_engine();
    engine.update(|s| {
        s.validate_error = Some(EngineError::Api {
            status: 500,
            message: "Validation failed".to_string(),
        });
        for item in s.items.iter_mut().filter(|i| i.is_eligible()) {
            item.error_details = Some(format!("{} is locked", item.id));
        }
    });
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap_err();

    assert_eq!(planner.status(), Some(PlanStatus::Failed));
    assert_eq!(
        planner.failure_detail(),
        Some("Class_i1: i1 is locked; Class_i2: i2 is locked")
    );
}

#[tokio::test]
async fn test_failed_plan_without_details_uses_fallback() {
    let engine = FakeEngine::with_state(|s| {
        s.plan = Some(plan(PlanStatus::Failed));
        s.items = standard_items();
    });
    let mut planner = loaded(&engine).await;

    assert_eq!(planner.failure_detail(), Some(DEPLOYMENT_FAILED));
}

#[tokio::test]
async fn test_reset_for_retry_returns_to_draft() {
    let engine = draft_engine();
    engine.update(|s| s.validate_error = Some(EngineError::Transport("timeout".to_string())));
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap_err();
    assert_eq!(planner.status(), Some(PlanStatus::Failed));

    planner.reset_for_retry().await.unwrap();
    assert_eq!(planner.status(), Some(PlanStatus::Draft));
    assert!(planner.failure_detail().is_none());
    assert!(!planner.is_validation_complete());
    assert_eq!(planner.eligible_count(), 2);
    assert_eq!(Calls::get(&engine.calls.reset), 1);

    // Draft has no retry exit
    let err = planner.reset_for_retry().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
    assert_eq!(Calls::get(&engine.calls.reset), 1);
}

#[tokio::test]
async fn test_refresh_tallies_only_run_items() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    planner.select_items(["i1"]);
    planner.validate_selected().await.unwrap();
    planner.deploy(false).await.unwrap();

    engine.update(|s| {
        for item in s.items.iter_mut() {
            item.apply_status = ApplyStatus::Applied;
        }
        if let Some(plan) = s.plan.as_mut() {
            plan.status = PlanStatus::Deployed;
        }
    });
    planner.refresh().await.unwrap();

    let run = planner.run().unwrap();
    assert_eq!(run.success_count, 1);
    assert_eq!(run.fail_count, 0);
    assert_eq!(planner.status(), Some(PlanStatus::Deployed));
}

#[tokio::test]
async fn test_refresh_keeps_local_validation_for_deploy() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap();
    // The engine never learns about the local validation and still reports Draft
    planner.refresh().await.unwrap();

    assert_eq!(planner.status(), Some(PlanStatus::Validated));
    assert!(planner.can_deploy());
    let run = planner.deploy(false).await.unwrap();
    assert_eq!(run.id, "run-1");
    assert_eq!(Calls::get(&engine.calls.execute), 1);
    assert!(!planner.can_deploy());
}

#[tokio::test]
async fn test_refresh_to_later_status_drops_validation() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap();
    engine.update(|s| {
        if let Some(plan) = s.plan.as_mut() {
            plan.status = PlanStatus::Executing;
        }
    });
    planner.refresh().await.unwrap();

    assert_eq!(planner.status(), Some(PlanStatus::Executing));
    assert!(!planner.can_deploy());
    let err = planner.deploy(false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(Calls::get(&engine.calls.execute), 0);
}

#[tokio::test]
async fn test_remote_cancel_goes_through_state_machine() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap();
    engine.update(|s| {
        if let Some(plan) = s.plan.as_mut() {
            plan.status = PlanStatus::Cancelled;
        }
    });
    planner.refresh().await.unwrap();

    assert_eq!(planner.status(), Some(PlanStatus::Cancelled));
    assert!(!planner.is_validation_complete());
    assert!(!planner.can_validate());
    assert!(matches!(
        planner.deploy(false).await,
        Err(OrchestratorError::Validation(_))
    ));
}

#[tokio::test]
async fn test_failure_detail_loaded_once_while_failed() {
    let engine = FakeEngine::with_state(|s| {
        s.plan = Some(plan(PlanStatus::Failed));
        s.items = standard_items();
        s.items[1].error_details = Some("Field is not writeable".to_string());
    });
    let mut planner = loaded(&engine).await;

    assert_eq!(planner.failure_detail(), Some("Class_i1: Field is not writeable"));
    assert_eq!(Calls::get(&engine.calls.deployment_errors), 1);

    planner.refresh().await.unwrap();
    planner.refresh().await.unwrap();
    assert_eq!(Calls::get(&engine.calls.deployment_errors), 1);
    assert_eq!(Calls::get(&engine.calls.run_details), 0);

    engine.update(|s| {
        if let Some(plan) = s.plan.as_mut() {
            plan.status = PlanStatus::Draft;
        }
    });
    planner.refresh().await.unwrap();
    assert!(planner.failure_detail().is_none());
    assert_eq!(Calls::get(&engine.calls.deployment_errors), 1);
}

#[tokio::test]
async fn test_failed_deploy_reads_run_detail_once() {
    let engine = draft_engine();
    let mut planner = loaded(&engine).await;

    planner.select_all_eligible();
    planner.validate_selected().await.unwrap();
    planner.deploy(false).await.unwrap();
    let run_reads = Calls::get(&engine.calls.run_details);

    engine.update(|s| {
        if let Some(plan) = s.plan.as_mut() {
            plan.status = PlanStatus::Failed;
        }
        if let Some(run) = s.run.as_mut() {
            run.status = RunStatus::Failed;
            run.error_message = Some("Org is locked for maintenance".to_string());
        }
    });
    planner.refresh().await.unwrap();
    assert_eq!(planner.failure_detail(), Some("Org is locked for maintenance"));
    // One read to refresh the run, one for the failure detail
    assert_eq!(Calls::get(&engine.calls.run_details), run_reads + 2);

    planner.refresh().await.unwrap();
    // Later refreshes only re-read the run itself
    assert_eq!(Calls::get(&engine.calls.run_details), run_reads + 3);
    assert_eq!(Calls::get(&engine.calls.deployment_errors), 0);
}
