//! In-process engines and session store with scripted responses and call counters

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use versionsweep::config::Config;
use versionsweep::domain::{
    ApplyStatus, BackupContent, BackupItem, BackupSummary, ChangeItem, ChangePlan, ComplianceMetrics,
    CreatePlanRequest, DeploymentRun, DiffResult, Eligibility, ExecuteRequest, Finding, FindingCategory,
    FindingsSummary, IncrementPolicy, InventoryCounts, ItemError, NamespacePolicy, PlanStatus, RestoreResult,
    RestoreStatus, RunStatus, Scan, ScanRequest, ScanStatus, Session, Severity, TestPolicy,
    ValidationResult, ValidationStatus, VersionDistribution,
};
use versionsweep::engine::{
    BackupEngine, DeployEngine, EngineError, PlanEngine, ScanEngine, SessionStore, StoreError,
};
use versionsweep::session::Engines;

pub const POLL_MS: u64 = 3000;

#[derive(Default)]
pub struct Calls {
    pub start_scan: AtomicUsize,
    pub get_status: AtomicUsize,
    pub cancel: AtomicUsize,
    pub findings: AtomicUsize,
    pub create_plan: AtomicUsize,
    pub validate: AtomicUsize,
    pub execute: AtomicUsize,
    pub reset: AtomicUsize,
    pub run_details: AtomicUsize,
    pub deployment_errors: AtomicUsize,
    pub inventory: AtomicUsize,
    pub restore: AtomicUsize,
    pub cleanup: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Mutable engine state shared by all four engine traits
#[derive(Default)]
pub struct EngineState {
    /// Status responses in order; the last scan seen repeats once this is empty
    pub statuses: VecDeque<Result<Option<Scan>, EngineError>>,
    pub last_status: Option<Scan>,
    pub next_scan: usize,
    pub recent: Vec<Scan>,
    pub findings: Vec<Finding>,
    pub findings_error: Option<EngineError>,
    pub cancel_error: Option<EngineError>,

    pub inventory: InventoryCounts,
    pub distributions: HashMap<String, VersionDistribution>,
    pub compliance_error: Option<EngineError>,

    pub plan: Option<ChangePlan>,
    /// Older plans listed after the current one
    pub plan_history: Vec<ChangePlan>,
    pub items: Vec<ChangeItem>,
    pub validation_errors: Vec<ItemError>,
    pub validate_error: Option<EngineError>,
    pub execute_error: Option<EngineError>,
    pub last_execute: Option<ExecuteRequest>,
    pub run: Option<DeploymentRun>,

    pub backup_summary: Option<BackupSummary>,
    pub backup_items: Vec<BackupItem>,
    pub failing_restores: Vec<String>,
}

#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<EngineState>,
    pub calls: Calls,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(f: impl FnOnce(&mut EngineState)) -> Arc<Self> {
        let engine = Self::default();
        f(&mut engine.state.lock().unwrap());
        Arc::new(engine)
    }

    pub fn update(&self, f: impl FnOnce(&mut EngineState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn script(&self, statuses: Vec<Result<Option<Scan>, EngineError>>) {
        self.state.lock().unwrap().statuses.extend(statuses);
    }

    pub fn engines(self: &Arc<Self>) -> Engines {
        Engines {
            scan: self.clone(),
            plan: self.clone(),
            deploy: self.clone(),
            backup: self.clone(),
        }
    }
}

#[async_trait]
impl ScanEngine for FakeEngine {
    async fn start_scan(&self, _request: &ScanRequest) -> Result<String, EngineError> {
        bump(&self.calls.start_scan);
        let mut state = self.state.lock().unwrap();
        state.next_scan += 1;
        Ok(format!("scan-{}", state.next_scan))
    }

    async fn get_scan_status(&self, scan_id: &str) -> Result<Option<Scan>, EngineError> {
        bump(&self.calls.get_status);
        let mut state = self.state.lock().unwrap();
        match state.statuses.pop_front() {
            Some(Ok(Some(mut scan))) => {
                scan.id = scan_id.to_string();
                state.last_status = Some(scan.clone());
                Ok(Some(scan))
            }
            Some(other) => other,
            None => Ok(state.last_status.clone().map(|mut scan| {
                scan.id = scan_id.to_string();
                scan
            })),
        }
    }

    async fn cancel_scan(&self, _scan_id: &str) -> Result<(), EngineError> {
        bump(&self.calls.cancel);
        match self.state.lock().unwrap().cancel_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_findings_by_scan(&self, _scan_id: &str) -> Result<Vec<Finding>, EngineError> {
        bump(&self.calls.findings);
        let state = self.state.lock().unwrap();
        match &state.findings_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.findings.clone()),
        }
    }

    async fn get_findings_summary(&self, _scan_id: &str) -> Result<FindingsSummary, EngineError> {
        let state = self.state.lock().unwrap();
        match &state.findings_error {
            Some(err) => Err(err.clone()),
            None => Ok(FindingsSummary::from_findings(&state.findings)),
        }
    }

    async fn get_recent_scans(&self, limit: u32) -> Result<Vec<Scan>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state.recent.iter().take(limit as usize).cloned().collect())
    }

    async fn get_inventory_counts(&self) -> Result<InventoryCounts, EngineError> {
        bump(&self.calls.inventory);
        Ok(self.state.lock().unwrap().inventory.clone())
    }

    async fn get_version_distribution(&self, artifact_type: &str) -> Result<VersionDistribution, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .distributions
            .get(artifact_type)
            .cloned()
            .ok_or_else(|| EngineError::Api {
                status: 400,
                message: format!("Unsupported artifact type {}", artifact_type),
            })
    }

    async fn get_compliance_metrics(
        &self,
        target_api_version: f64,
        scope: NamespacePolicy,
    ) -> Result<ComplianceMetrics, EngineError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.compliance_error {
            return Err(err.clone());
        }
        let total = state.inventory.total();
        let below: u32 = state
            .distributions
            .values()
            .map(|d| d.below_target_count(target_api_version))
            .sum();
        Ok(ComplianceMetrics {
            target_api_version,
            scope_policy: scope,
            total_components: total,
            compliant_components: total.saturating_sub(below),
            below_target_by_type: state
                .distributions
                .iter()
                .map(|(t, d)| (t.clone(), d.below_target_count(target_api_version)))
                .collect(),
        })
    }
}

#[async_trait]
impl PlanEngine for FakeEngine {
    async fn create_change_plan(&self, request: &CreatePlanRequest) -> Result<String, EngineError> {
        bump(&self.calls.create_plan);
        let mut state = self.state.lock().unwrap();
        let plan = state.plan.as_mut().ok_or_else(|| EngineError::Api {
            status: 400,
            message: "No eligible artifacts in scan".to_string(),
        })?;
        plan.source_scan_id = request.scan_id.clone();
        plan.target_api_version = request.target_api_version;
        Ok(plan.id.clone())
    }

    async fn get_change_plan(&self, plan_id: &str) -> Result<ChangePlan, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .plan
            .clone()
            .filter(|p| p.id == plan_id)
            .ok_or_else(|| EngineError::NotFound(format!("Plan {}", plan_id)))
    }

    async fn get_change_items(&self, _plan_id: &str) -> Result<Vec<ChangeItem>, EngineError> {
        Ok(self.state.lock().unwrap().items.clone())
    }

    async fn reset_plan_for_retry(&self, _plan_id: &str) -> Result<(), EngineError> {
        bump(&self.calls.reset);
        let mut state = self.state.lock().unwrap();
        if let Some(plan) = state.plan.as_mut() {
            plan.status = PlanStatus::Draft;
        }
        for item in &mut state.items {
            item.error_details = None;
            item.apply_status = ApplyStatus::Pending;
        }
        Ok(())
    }

    async fn get_deployment_errors_for_plan(&self, _plan_id: &str) -> Result<Vec<ChangeItem>, EngineError> {
        bump(&self.calls.deployment_errors);
        let state = self.state.lock().unwrap();
        Ok(state.items.iter().filter(|i| i.error_details.is_some()).cloned().collect())
    }

    async fn get_deployment_run_details(&self, run_id: &str) -> Result<DeploymentRun, EngineError> {
        bump(&self.calls.run_details);
        let state = self.state.lock().unwrap();
        state
            .run
            .clone()
            .filter(|r| r.id == run_id)
            .ok_or_else(|| EngineError::NotFound(format!("Run {}", run_id)))
    }

    async fn get_plan_history(&self, limit: u32) -> Result<Vec<ChangePlan>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .plan
            .iter()
            .chain(state.plan_history.iter())
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeployEngine for FakeEngine {
    async fn validate(&self, _plan_id: &str, item_ids: &[String]) -> Result<ValidationResult, EngineError> {
        bump(&self.calls.validate);
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.validate_error {
            return Err(err.clone());
        }
        let errors: Vec<ItemError> = state
            .validation_errors
            .iter()
            .filter(|e| item_ids.contains(&e.item_id))
            .cloned()
            .collect();
        Ok(ValidationResult {
            validated_ids: item_ids
                .iter()
                .filter(|id| !errors.iter().any(|e| &e.item_id == *id))
                .cloned()
                .collect(),
            errors,
            timestamp: Utc::now(),
        })
    }

    async fn execute_plan_with_backup(&self, request: &ExecuteRequest) -> Result<String, EngineError> {
        bump(&self.calls.execute);
        let mut state = self.state.lock().unwrap();
        state.last_execute = Some(request.clone());
        if let Some(err) = &state.execute_error {
            return Err(err.clone());
        }

        if let Some(plan) = state.plan.as_mut() {
            plan.status = PlanStatus::Executing;
        }
        let mut run = DeploymentRun::queued(
            "run-1".to_string(),
            request.plan_id.clone(),
            request.item_ids.clone(),
            request.create_backup,
        );
        run.status = RunStatus::Running;
        state.run = Some(run);

        if request.create_backup {
            let created = Utc::now();
            state.backup_summary = Some(BackupSummary {
                deployment_run_id: "run-1".to_string(),
                backup_created_at: Some(created),
                expiration_date: None,
                item_count: request.item_ids.len() as u32,
            });
            state.backup_items = request
                .item_ids
                .iter()
                .map(|id| backup_item(&format!("bk-{}", id), "run-1"))
                .collect();
        }
        Ok("run-1".to_string())
    }
}

#[async_trait]
impl BackupEngine for FakeEngine {
    async fn get_backup_summary(&self, run_id: &str) -> Result<BackupSummary, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .backup_summary
            .clone()
            .filter(|s| s.deployment_run_id == run_id)
            .ok_or_else(|| EngineError::NotFound(format!("Backup for run {}", run_id)))
    }

    async fn get_backup_items(&self, run_id: &str) -> Result<Vec<BackupItem>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .backup_items
            .iter()
            .filter(|i| i.deployment_run_id == run_id)
            .cloned()
            .collect())
    }

    async fn get_backup_content(&self, backup_item_id: &str) -> Result<BackupContent, EngineError> {
        let state = self.state.lock().unwrap();
        let item = state
            .backup_items
            .iter()
            .find(|i| i.id == backup_item_id)
            .ok_or_else(|| EngineError::NotFound(format!("Backup item {}", backup_item_id)))?;
        Ok(BackupContent {
            backup_item_id: item.id.clone(),
            full_name: item.full_name.clone(),
            content: format!("public class {} {{}}", item.full_name),
            metadata: None,
        })
    }

    async fn get_diff(&self, backup_item_id: &str) -> Result<DiffResult, EngineError> {
        Ok(DiffResult {
            has_content_changes: false,
            has_metadata_changes: backup_item_id.ends_with('1'),
            content_diff: None,
            metadata_diff: None,
        })
    }

    async fn restore_item(&self, backup_item_id: &str) -> Result<RestoreResult, EngineError> {
        bump(&self.calls.restore);
        let mut state = self.state.lock().unwrap();
        let failing = state.failing_restores.iter().any(|id| id == backup_item_id);
        let item = state
            .backup_items
            .iter_mut()
            .find(|i| i.id == backup_item_id)
            .ok_or_else(|| EngineError::NotFound(format!("Backup item {}", backup_item_id)))?;
        Ok(restore(item, failing))
    }

    async fn restore_all(&self, run_id: &str) -> Result<Vec<RestoreResult>, EngineError> {
        bump(&self.calls.restore);
        let mut state = self.state.lock().unwrap();
        let failing = state.failing_restores.clone();
        Ok(state
            .backup_items
            .iter_mut()
            .filter(|i| i.deployment_run_id == run_id && i.is_restorable())
            .map(|item| {
                let fails = failing.contains(&item.id);
                restore(item, fails)
            })
            .collect())
    }

    async fn cleanup_backup(&self, _run_id: &str) -> Result<(), EngineError> {
        bump(&self.calls.cleanup);
        let mut state = self.state.lock().unwrap();
        state.backup_summary = None;
        state.backup_items.clear();
        Ok(())
    }

    async fn create_backup_for_deployment(&self, run_id: &str) -> Result<BackupSummary, EngineError> {
        let mut state = self.state.lock().unwrap();
        let summary = BackupSummary::created(run_id.to_string(), Utc::now(), 30);
        state.backup_summary = Some(summary.clone());
        Ok(summary)
    }
}

fn restore(item: &mut BackupItem, fails: bool) -> RestoreResult {
    if fails {
        return RestoreResult {
            backup_item_id: item.id.clone(),
            full_name: Some(item.full_name.clone()),
            success: false,
            error_message: Some("Artifact is locked".to_string()),
        };
    }
    item.restore_status = RestoreStatus::Restored;
    item.restored_at = Some(Utc::now());
    RestoreResult {
        backup_item_id: item.id.clone(),
        full_name: Some(item.full_name.clone()),
        success: true,
        error_message: None,
    }
}

/// Session store kept in memory, with a save counter
#[derive(Default)]
pub struct MemoryStore {
    pub sessions: Mutex<HashMap<String, Session>>,
    pub saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stored(&self, owner: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(owner).cloned()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_current_session(&self, owner: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.stored(owner))
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        bump(&self.saves);
        self.sessions
            .lock()
            .unwrap()
            .insert(session.owner.clone(), session.clone());
        Ok(())
    }

    async fn clear_session(&self, owner: &str) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().remove(owner);
        Ok(())
    }
}

// -- Builders --

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.session.owner = "admin".to_string();
    config.monitor.poll_interval_ms = POLL_MS;
    config
}

pub fn scan(status: ScanStatus) -> Scan {
    let request = ScanRequest::new(vec!["ApexClass".to_string()], 65.0);
    let mut scan = Scan::queued(String::new(), &request);
    scan.status = status;
    scan.total_artifacts = 10;
    scan.processed_artifacts = if status == ScanStatus::Running { 4 } else { 10 };
    scan
}

pub fn completed_scan(findings: u32) -> Scan {
    let mut scan = scan(ScanStatus::Completed);
    scan.findings_count = findings;
    scan
}

pub fn finding(id: &str, severity: Severity) -> Finding {
    Finding {
        id: id.to_string(),
        scan_id: "scan-1".to_string(),
        artifact_name: format!("Artifact_{}", id),
        category: FindingCategory::VersionRisk,
        severity,
        is_blocking: severity == Severity::Critical,
        summary: "API version below policy".to_string(),
        rule_id: "VERSION_FLOOR".to_string(),
    }
}

pub fn plan(status: PlanStatus) -> ChangePlan {
    ChangePlan {
        id: "plan-1".to_string(),
        name: Some("Upgrade to 65".to_string()),
        source_scan_id: "scan-1".to_string(),
        target_api_version: 65.0,
        increment_policy: IncrementPolicy::IncrementalOnly,
        validate_only: true,
        test_policy: TestPolicy::RunSpecifiedTests,
        status,
        total_items: 3,
        eligible_items: 2,
        created_at: Some(Utc::now()),
    }
}

pub fn named_plan(id: &str, name: &str) -> ChangePlan {
    ChangePlan {
        id: id.to_string(),
        name: Some(name.to_string()),
        ..plan(PlanStatus::Deployed)
    }
}

pub fn named_scan(id: &str, name: Option<&str>) -> Scan {
    let mut scan = completed_scan(0);
    scan.id = id.to_string();
    scan.name = name.map(str::to_string);
    scan
}

/// Org inventory with one ApexClass distribution: 15 of 20 classes below 65
pub fn inventory_engine() -> Arc<FakeEngine> {
    FakeEngine::with_state(|s| {
        s.inventory = InventoryCounts(
            [("ApexClass".to_string(), 20), ("ApexTrigger".to_string(), 5)]
                .into_iter()
                .collect(),
        );
        let counts = [("48.0", 5), ("62.0", 10), ("65.0", 5)]
            .into_iter()
            .map(|(v, c)| (v.to_string(), c))
            .collect();
        s.distributions
            .insert("ApexClass".to_string(), VersionDistribution::new("ApexClass", counts));
    })
}

pub fn item(id: &str, unit: u32, eligibility: Eligibility) -> ChangeItem {
    ChangeItem {
        id: id.to_string(),
        plan_id: "plan-1".to_string(),
        unit_number: unit,
        full_name: format!("Class_{}", id),
        artifact_type: "ApexClass".to_string(),
        current_api_version: 50.0,
        target_api_version: 56.0,
        eligibility,
        block_reason: match eligibility {
            Eligibility::Blocked => Some("Managed package artifact".to_string()),
            Eligibility::Eligible => None,
        },
        apply_status: ApplyStatus::Pending,
        validation_status: ValidationStatus::NotValidated,
        error_details: None,
    }
}

/// Two eligible items and one blocked one
pub fn standard_items() -> Vec<ChangeItem> {
    vec![
        item("i3", 3, Eligibility::Blocked),
        item("i1", 1, Eligibility::Eligible),
        item("i2", 2, Eligibility::Eligible),
    ]
}

pub fn backup_item(id: &str, run_id: &str) -> BackupItem {
    let created = Utc::now();
    BackupItem {
        id: id.to_string(),
        deployment_run_id: run_id.to_string(),
        full_name: format!("Class_{}", id),
        artifact_type: "ApexClass".to_string(),
        original_api_version: 50.0,
        backup_created_at: created,
        expiration_date: created + chrono::Duration::days(30),
        restore_status: RestoreStatus::NotRestored,
        restored_at: None,
    }
}
