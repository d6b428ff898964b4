//! Session coordinator: the resumable five-step workflow that binds the scan
//! monitor, findings aggregator, change planner and backup manager together.
//!
//! Every step transition is written to the [`SessionStore`] before the
//! operation returns, so a client attaching later sees the latest pointers.

mod view;

pub use view::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::backup::BackupManager;
use crate::config::{Config, WorkflowDefaults};
use crate::domain::{
    BackupContent, BackupSummary, ChangePlan, CreatePlanRequest, DiffResult, DeploymentRun, IncrementPolicy,
    NamespacePolicy, OrchestratorError, RestoreReport, RestoreResult, Scan, ScanRequest, ScanStatus, Session, TestPolicy,
    ValidationResult, WorkflowStep,
};
use crate::engine::{BackupEngine, DeployEngine, HttpEngineClient, PlanEngine, ScanEngine, SessionStore};
use crate::events::{Event, EventBus, NoticeLevel};
use crate::findings::FindingsAggregator;
use crate::inventory::InventoryTracker;
use crate::monitor::{ScanMonitor, ScanUpdate};
use crate::plan::ChangePlanner;

/// The external engines a coordinator drives
#[derive(Clone)]
pub struct Engines {
    pub scan: Arc<dyn ScanEngine>,
    pub plan: Arc<dyn PlanEngine>,
    pub deploy: Arc<dyn DeployEngine>,
    pub backup: Arc<dyn BackupEngine>,
}

impl Engines {
    /// Use one HTTP client for every engine
    pub fn http(client: HttpEngineClient) -> Self {
        let client = Arc::new(client);
        Self {
            scan: client.clone(),
            plan: client.clone(),
            deploy: client.clone(),
            backup: client,
        }
    }
}

/// Options for a new change plan; the scan comes from the session
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub target_api_version: f64,
    pub increment_policy: IncrementPolicy,
    pub validate_only: bool,
    pub test_policy: TestPolicy,
}

impl PlanOptions {
    pub fn from_defaults(defaults: &WorkflowDefaults) -> Self {
        Self {
            target_api_version: defaults.target_api_version,
            increment_policy: defaults.increment_policy,
            validate_only: defaults.validate_only,
            test_policy: defaults.test_policy,
        }
    }
}

/// Owns all orchestration state for one session owner
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    events: EventBus,
    session: Session,
    defaults: WorkflowDefaults,
    monitor: ScanMonitor,
    findings: FindingsAggregator,
    inventory: InventoryTracker,
    planner: ChangePlanner,
    backup: BackupManager,
}

impl SessionCoordinator {
    pub fn new(config: &Config, engines: Engines, store: Arc<dyn SessionStore>, events: EventBus) -> Self {
        let monitor = ScanMonitor::new(
            Arc::clone(&engines.scan),
            Duration::from_millis(config.monitor.poll_interval_ms),
            config.monitor.recent_scans_limit,
        );
        let findings = FindingsAggregator::new(Arc::clone(&engines.scan));
        let inventory = InventoryTracker::new(Arc::clone(&engines.scan));
        let planner = ChangePlanner::new(
            Arc::clone(&engines.plan),
            Arc::clone(&engines.deploy),
            Duration::from_secs(config.plan.validation_timeout_secs),
            config.plan.failure_detail_items,
        );
        let backup = BackupManager::new(Arc::clone(&engines.backup), events.clone(), config.backup.clone());

        Self {
            store,
            events: events.clone(),
            session: Session::new(config.session.owner.clone()),
            defaults: config.defaults.clone(),
            monitor,
            findings,
            inventory,
            planner,
            backup,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn monitor(&self) -> &ScanMonitor {
        &self.monitor
    }

    pub fn findings(&self) -> &FindingsAggregator {
        &self.findings
    }

    pub fn inventory(&self) -> &InventoryTracker {
        &self.inventory
    }

    pub fn planner(&self) -> &ChangePlanner {
        &self.planner
    }

    pub fn backup(&self) -> &BackupManager {
        &self.backup
    }

    pub fn defaults(&self) -> &WorkflowDefaults {
        &self.defaults
    }

    /// Scan request built from the configured defaults
    pub fn default_scan_request(&self) -> ScanRequest {
        ScanRequest::new(self.defaults.types.clone(), self.defaults.target_api_version)
            .with_namespace_policy(self.defaults.namespace_policy)
    }

    pub fn default_plan_options(&self) -> PlanOptions {
        PlanOptions::from_defaults(&self.defaults)
    }

    // -- Persistence --

    async fn persist(&mut self) -> Result<(), OrchestratorError> {
        self.session.updated_at = Utc::now();
        self.store.save_session(&self.session).await?;
        Ok(())
    }

    fn advance(&mut self, step: WorkflowStep) {
        let from = self.session.workflow_step;
        if self.session.advance_to(step) {
            info!("Workflow step {} -> {}", from.number(), step.number());
            self.events.publish(Event::StepChanged {
                from,
                to: step,
                timestamp: Utc::now(),
            });
        }
    }

    fn notify_error(&self, title: &str, err: &OrchestratorError) {
        self.events.notify(NoticeLevel::Error, title, err.user_message());
    }

    /// Drop plan, deployment and backup state that belonged to an old scan
    fn reset_downstream_of_scan(&mut self) {
        self.findings.clear();
        self.planner.clear();
        self.backup.unbind();
    }

    /// Reload the saved session and rebuild the in-memory state it points at
    pub async fn resume(&mut self) -> Result<&Session, OrchestratorError> {
        let owner = self.session.owner.clone();
        self.session = self
            .store
            .get_current_session(&owner)
            .await?
            .unwrap_or_else(|| Session::new(owner));
        info!(
            "Resumed session for {} at step {}",
            self.session.owner,
            self.session.workflow_step.number()
        );

        if let Some(scan_id) = self.session.current_scan_id.clone() {
            match self.monitor.select_scan(&scan_id).await {
                Ok(scan) if scan.status == ScanStatus::Completed => {
                    if let Err(e) = self.findings.load_results(&scan_id).await {
                        warn!("Failed to reload findings for scan {}: {}", scan_id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to reload scan {}: {}", scan_id, e),
            }
        }

        if let Some(plan_id) = self.session.current_change_plan_id.clone() {
            if let Err(e) = self.planner.load_plan(&plan_id).await {
                warn!("Failed to reload plan {}: {}", plan_id, e);
            }
        }

        if let Some(run_id) = self.session.current_deployment_run_id.clone() {
            if let Err(e) = self.planner.attach_run(&run_id).await {
                warn!("Failed to reload deployment run {}: {}", run_id, e);
            }
            if self.session.has_backup {
                self.backup.bind(&run_id);
                if let Err(e) = self.backup.load().await {
                    warn!("Failed to reload backup for run {}: {}", run_id, e);
                }
            }
        }

        Ok(&self.session)
    }

    // -- Step 1: scan --

    pub async fn start_scan(&mut self, request: &ScanRequest) -> Result<Scan, OrchestratorError> {
        let scan = match self.monitor.start_scan(request).await {
            Ok(scan) => scan,
            Err(e) => {
                self.notify_error("Scan Failed to Start", &e);
                return Err(e);
            }
        };

        self.reset_downstream_of_scan();
        self.session.set_scan(&scan.id);
        self.advance(WorkflowStep::ScanRunning);
        self.persist().await?;

        self.events.notify(NoticeLevel::Info, "Scan Started", "Scan is now running");
        Ok(scan)
    }

    /// Make an existing scan current. Selecting a different scan drops
    /// every downstream pointer.
    pub async fn select_scan(&mut self, scan_id: &str) -> Result<Scan, OrchestratorError> {
        let scan = self.monitor.select_scan(scan_id).await?;

        if self.session.current_scan_id.as_deref() != Some(scan_id) {
            self.reset_downstream_of_scan();
        }
        self.session.set_scan(scan_id);

        match scan.status {
            ScanStatus::Completed => {
                self.advance(WorkflowStep::ScanReviewed);
                self.load_findings_for(scan_id).await;
            }
            ScanStatus::Failed => self.advance(WorkflowStep::ScanReviewed),
            _ => self.advance(WorkflowStep::ScanRunning),
        }
        self.persist().await?;

        Ok(scan)
    }

    /// Wait for the next poll result and apply it. `None` once nothing is
    /// being polled.
    pub async fn drive_scan(&mut self) -> Result<Option<ScanUpdate>, OrchestratorError> {
        match self.monitor.next_update().await {
            Some(update) => {
                self.handle_scan_update(&update).await?;
                Ok(Some(update))
            }
            None => Ok(None),
        }
    }

    /// Drive the poll loop until it stops, returning the last update
    pub async fn watch_scan(&mut self) -> Result<Option<ScanUpdate>, OrchestratorError> {
        let mut last = None;
        while let Some(update) = self.drive_scan().await? {
            last = Some(update);
        }
        Ok(last)
    }

    /// Apply every update that is already waiting, without blocking
    pub async fn pump_scan_updates(&mut self) -> Result<usize, OrchestratorError> {
        let mut applied = 0;
        while let Some(update) = self.monitor.try_next_update() {
            self.handle_scan_update(&update).await?;
            applied += 1;
        }
        Ok(applied)
    }

    async fn handle_scan_update(&mut self, update: &ScanUpdate) -> Result<(), OrchestratorError> {
        match update {
            ScanUpdate::Status(scan) => {
                self.events.publish(Event::ScanStatusChanged {
                    scan_id: scan.id.clone(),
                    status: scan.status,
                    progress_percent: scan.progress_percent(),
                    timestamp: Utc::now(),
                });

                if !scan.is_terminal() {
                    return Ok(());
                }

                match scan.status {
                    ScanStatus::Completed => {
                        self.advance(WorkflowStep::ScanReviewed);
                        self.persist().await?;
                        self.load_findings_for(&scan.id).await;
                    }
                    ScanStatus::Failed => {
                        self.advance(WorkflowStep::ScanReviewed);
                        self.persist().await?;
                        self.events
                            .notify(NoticeLevel::Error, "Scan Failed", "The scan encountered an error");
                    }
                    _ => {
                        self.events
                            .notify(NoticeLevel::Warning, "Scan Cancelled", "The scan was cancelled");
                    }
                }

                if let Err(e) = self.monitor.refresh_recent().await {
                    warn!("Failed to refresh recent scans: {}", e);
                }
            }
            ScanUpdate::Removed(scan_id) => {
                info!("Scan {} no longer exists", scan_id);
                self.events
                    .notify(NoticeLevel::Warning, "Scan Not Found", "The scan no longer exists");
            }
            ScanUpdate::PollFailed { error, .. } => {
                self.notify_error("Polling Stopped", error);
            }
        }
        Ok(())
    }

    async fn load_findings_for(&mut self, scan_id: &str) {
        match self.findings.load_results(scan_id).await {
            Ok((findings, _)) => {
                let count = findings.len();
                self.events.publish(Event::FindingsLoaded {
                    scan_id: scan_id.to_string(),
                    count,
                    timestamp: Utc::now(),
                });
                self.events.notify(
                    NoticeLevel::Success,
                    "Scan Complete",
                    format!("Found {} findings", count),
                );
            }
            Err(e) => self.notify_error("Failed to Load Findings", &e),
        }
    }

    /// Reload findings for the current scan
    pub async fn load_findings(&mut self) -> Result<usize, OrchestratorError> {
        let scan_id = self
            .session
            .current_scan_id
            .clone()
            .ok_or_else(|| OrchestratorError::not_found("No scan selected"))?;
        let (findings, _) = self.findings.load_results(&scan_id).await?;
        Ok(findings.len())
    }

    /// Stop polling and ask the engine to cancel the current scan
    pub async fn cancel_scan(&mut self) -> Result<(), OrchestratorError> {
        match self.monitor.cancel_scan().await {
            Ok(()) => {
                self.events
                    .notify(NoticeLevel::Success, "Scan Cancelled", "Scan has been cancelled");
                Ok(())
            }
            Err(e) => {
                self.notify_error("Cancel Failed", &e);
                Err(e)
            }
        }
    }

    pub async fn recent_scans(&mut self) -> Result<&[Scan], OrchestratorError> {
        self.monitor.refresh_recent().await
    }

    /// Recent scans whose id or name contains `search`
    pub async fn search_scans(&mut self, search: &str) -> Result<Vec<Scan>, OrchestratorError> {
        let scans = self.monitor.refresh_recent().await?;
        Ok(scans.iter().filter(|s| s.matches_search(search)).cloned().collect())
    }

    // -- Inventory --

    /// Reload org inventory for one artifact type. Compliance is measured
    /// against the configured target version and scope unless overridden.
    pub async fn refresh_inventory(
        &mut self,
        artifact_type: &str,
        target: Option<f64>,
        scope: Option<NamespacePolicy>,
    ) -> Result<&InventoryTracker, OrchestratorError> {
        let target = target.unwrap_or(self.defaults.target_api_version);
        let scope = scope.unwrap_or(self.defaults.namespace_policy);
        let failures = match self.inventory.refresh(artifact_type, target, scope).await {
            Ok(failures) => failures,
            Err(e) => {
                self.notify_error("Inventory Error", &e);
                return Err(e);
            }
        };
        for (part, err) in &failures {
            self.notify_error(part.title(), err);
        }
        Ok(&self.inventory)
    }

    // -- Step 3: plan --

    pub async fn create_plan(&mut self, options: &PlanOptions) -> Result<ChangePlan, OrchestratorError> {
        let scan_id = self
            .session
            .current_scan_id
            .clone()
            .ok_or_else(|| OrchestratorError::not_found("No scan selected for the change plan"))?;

        let request = CreatePlanRequest {
            scan_id,
            target_api_version: options.target_api_version,
            increment_policy: options.increment_policy,
            validate_only: options.validate_only,
            test_policy: options.test_policy,
        };

        let plan = match self.planner.create_plan(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                self.notify_error("Plan Creation Failed", &e);
                return Err(e);
            }
        };

        self.bind_plan(&plan).await?;
        self.events.notify(
            NoticeLevel::Success,
            "Plan Created",
            format!(
                "Created plan with {} items ({} eligible)",
                self.planner.items().len(),
                plan.eligible_items
            ),
        );
        Ok(plan)
    }

    /// Make an existing plan current
    pub async fn select_plan(&mut self, plan_id: &str) -> Result<ChangePlan, OrchestratorError> {
        let plan = self.planner.load_plan(plan_id).await?;

        if self.session.current_scan_id.as_deref() != Some(plan.source_scan_id.as_str()) {
            self.findings.clear();
            self.session.set_scan(&plan.source_scan_id);
        }
        self.bind_plan(&plan).await?;
        Ok(plan)
    }

    async fn bind_plan(&mut self, plan: &ChangePlan) -> Result<(), OrchestratorError> {
        if self.session.current_change_plan_id.as_deref() != Some(plan.id.as_str()) {
            self.backup.unbind();
        }
        self.session.set_plan(&plan.id);
        self.advance(WorkflowStep::PlanCreated);
        self.persist().await?;

        self.events.publish(Event::PlanSelected {
            plan_id: plan.id.clone(),
            status: plan.status,
            eligible_items: plan.eligible_items,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn plan_history(&mut self, limit: u32) -> Result<&[ChangePlan], OrchestratorError> {
        self.planner.refresh_history(limit).await
    }

    /// Plan history entries whose id or name contains `search`
    pub async fn search_plans(&mut self, search: &str, limit: u32) -> Result<Vec<ChangePlan>, OrchestratorError> {
        let plans = self.planner.refresh_history(limit).await?;
        Ok(plans.iter().filter(|p| p.matches_search(search)).cloned().collect())
    }

    pub fn select_items<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.planner.select_items(ids)
    }

    pub fn select_all_eligible(&mut self) -> usize {
        self.planner.select_all_eligible()
    }

    pub fn select_none(&mut self) {
        self.planner.select_none()
    }

    pub async fn refresh_plan(&mut self) -> Result<(), OrchestratorError> {
        self.planner.refresh().await
    }

    pub async fn validate_selected(&mut self) -> Result<ValidationResult, OrchestratorError> {
        match self.planner.validate_selected().await {
            Ok(result) => {
                let (level, message) = if result.has_errors() {
                    (
                        NoticeLevel::Warning,
                        format!(
                            "Validated {} items with {} errors",
                            result.validated_ids.len(),
                            result.errors.len()
                        ),
                    )
                } else {
                    (
                        NoticeLevel::Success,
                        format!("Validated {} items", result.validated_ids.len()),
                    )
                };
                self.events.notify(level, "Validation Complete", message);
                Ok(result)
            }
            Err(e) => {
                self.report_plan_failure("Validation Failed", &e);
                Err(e)
            }
        }
    }

    // -- Step 4: deploy --

    pub async fn deploy(&mut self, create_backup: bool) -> Result<DeploymentRun, OrchestratorError> {
        let run = match self.planner.deploy(create_backup).await {
            Ok(run) => run,
            Err(e) => {
                self.report_plan_failure("Deployment Failed", &e);
                return Err(e);
            }
        };

        self.session.set_deployment_run(&run.id, create_backup);
        if create_backup {
            self.backup.bind(&run.id);
        } else {
            self.backup.unbind();
        }
        self.advance(WorkflowStep::Deployed);
        self.persist().await?;

        self.events.publish(Event::DeploymentStarted {
            plan_id: run.plan_id.clone(),
            run_id: run.id.clone(),
            backup_enabled: create_backup,
            timestamp: Utc::now(),
        });
        self.events.notify(
            NoticeLevel::Success,
            "Deployment Started",
            format!("Deployment of {} items has been queued", run.item_ids.len()),
        );
        Ok(run)
    }

    /// Publish the richest failure text available for a failed plan action
    fn report_plan_failure(&self, title: &str, err: &OrchestratorError) {
        let message = self
            .planner
            .failure_detail()
            .map(str::to_string)
            .unwrap_or_else(|| err.user_message());

        // Gating errors leave the plan untouched
        if !matches!(err, OrchestratorError::Validation(_)) {
            if let Some(plan) = self.planner.plan() {
                self.events.publish(Event::DeploymentFailed {
                    plan_id: plan.id.clone(),
                    message: message.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        self.events.notify(NoticeLevel::Error, title, message);
    }

    pub async fn retry_plan(&mut self) -> Result<(), OrchestratorError> {
        self.planner.reset_for_retry().await?;
        self.events
            .notify(NoticeLevel::Info, "Plan Reset", "The plan is back in Draft and can be retried");
        Ok(())
    }

    pub async fn failure_detail(&mut self) -> Option<String> {
        self.planner.load_failure_detail(None).await.map(str::to_string)
    }

    // -- Step 5: backup --

    fn require_run(&self) -> Result<String, OrchestratorError> {
        self.session
            .current_deployment_run_id
            .clone()
            .ok_or_else(|| OrchestratorError::not_found("No deployment run in this session"))
    }

    /// Open the backup set of the current deployment run
    pub async fn manage_backup(&mut self) -> Result<(), OrchestratorError> {
        self.bind_backup()?;
        self.backup.load().await?;
        self.advance(WorkflowStep::BackupManaged);
        self.persist().await
    }

    pub async fn create_backup(&mut self) -> Result<BackupSummary, OrchestratorError> {
        let run_id = self.require_run()?;
        self.backup.bind(&run_id);
        let summary = self.backup.create_backup().await?;

        self.session.has_backup = true;
        self.advance(WorkflowStep::BackupManaged);
        self.persist().await?;
        Ok(summary)
    }

    pub async fn restore_item(&mut self, backup_item_id: &str) -> Result<RestoreResult, OrchestratorError> {
        self.bind_backup()?;
        self.backup.restore_item(backup_item_id).await
    }

    pub async fn restore_all(&mut self) -> Result<RestoreReport, OrchestratorError> {
        self.bind_backup()?;
        self.backup.restore_all().await
    }

    pub async fn cleanup_backup(&mut self) -> Result<(), OrchestratorError> {
        self.bind_backup()?;
        self.backup.cleanup().await?;
        self.session.has_backup = false;
        self.persist().await
    }

    pub async fn preview_backup(&mut self, backup_item_id: &str) -> Result<BackupContent, OrchestratorError> {
        self.bind_backup()?;
        self.backup.preview(backup_item_id).await
    }

    pub async fn diff_backup(&mut self, backup_item_id: &str) -> Result<DiffResult, OrchestratorError> {
        self.bind_backup()?;
        self.backup.diff(backup_item_id).await
    }

    pub async fn load_backup(&mut self) -> Result<(), OrchestratorError> {
        self.bind_backup()?;
        self.backup.load().await
    }

    /// Bind the manager to the current run. Fails before any remote call
    /// when the run was deployed without a backup.
    fn bind_backup(&mut self) -> Result<(), OrchestratorError> {
        let run_id = self.require_run()?;
        if !self.session.has_backup {
            return Err(OrchestratorError::validation(format!(
                "Deployment run {} has no backup; create one first",
                run_id
            )));
        }
        self.backup.bind(&run_id);
        Ok(())
    }

    // -- Reset --

    /// Reset every pointer and step. The only way the step goes backwards.
    pub async fn clear_session(&mut self) -> Result<(), OrchestratorError> {
        let from = self.session.workflow_step;
        self.monitor.reset();
        self.reset_downstream_of_scan();
        self.session.clear();
        self.store.clear_session(&self.session.owner).await?;

        info!("Cleared session for {}", self.session.owner);
        self.events.publish(Event::StepChanged {
            from,
            to: WorkflowStep::NotStarted,
            timestamp: Utc::now(),
        });
        self.events.publish(Event::SessionCleared {
            owner: self.session.owner.clone(),
            timestamp: Utc::now(),
        });
        self.events
            .notify(NoticeLevel::Info, "Session Cleared", "Start a new scan to begin again");
        Ok(())
    }

    pub fn can_navigate_to(&self, step: WorkflowStep) -> bool {
        self.session.can_navigate_to(step)
    }
}
