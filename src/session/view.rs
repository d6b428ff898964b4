//! Read-only snapshot of a session for presentation surfaces

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SessionCoordinator;
use crate::domain::{
    Badge, ExecutionTally, ExpirationUrgency, PlanStatus, ScanStatus, Severity, WorkflowStep,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanView {
    pub id: String,
    pub status: ScanStatus,
    pub badge: Badge,
    pub progress_percent: u32,
    pub is_polling: bool,
    pub findings_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingsView {
    pub total: usize,
    pub critical: u32,
    pub warning: u32,
    pub has_blocking: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub id: String,
    pub name: Option<String>,
    pub status: PlanStatus,
    pub badge: Badge,
    pub total_items: usize,
    pub eligible_items: usize,
    pub blocked_items: usize,
    pub selected_items: usize,
    pub validation_complete: bool,
    pub can_validate: bool,
    pub can_deploy: bool,
    pub failure_detail: Option<String>,
    pub tally: ExecutionTally,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupView {
    pub run_id: String,
    pub item_count: usize,
    pub restorable_count: usize,
    pub days_until_expiration: Option<i64>,
    pub urgency: Option<ExpirationUrgency>,
}

/// Everything a wizard-style surface needs to render one frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub owner: String,
    pub step: WorkflowStep,
    pub step_label: String,
    pub progress_percent: u32,
    pub completed_steps: Vec<WorkflowStep>,
    pub has_findings: bool,
    pub scan: Option<ScanView>,
    pub findings: Option<FindingsView>,
    pub plan: Option<PlanView>,
    pub deployment_run_id: Option<String>,
    pub backup: Option<BackupView>,
}

impl SessionCoordinator {
    pub fn view_state(&self, now: DateTime<Utc>) -> ViewState {
        let session = &self.session;

        let scan = self.monitor.current().map(|s| ScanView {
            id: s.id.clone(),
            status: s.status,
            badge: s.status.badge(),
            progress_percent: s.progress_percent(),
            is_polling: self.monitor.is_polling(),
            findings_count: s.findings_count,
        });

        let findings = self.findings.scan_id().map(|_| FindingsView {
            total: self.findings.findings().len(),
            critical: self.findings.count(Severity::Critical),
            warning: self.findings.count(Severity::Warning),
            has_blocking: self.findings.has_blocking_findings(),
        });

        let has_findings = self.findings.has_findings()
            || scan.as_ref().map(|s| s.findings_count > 0).unwrap_or(false);

        let plan = self.planner.plan().map(|p| PlanView {
            id: p.id.clone(),
            name: p.name.clone(),
            status: p.status,
            badge: p.status.badge(),
            total_items: self.planner.items().len(),
            eligible_items: self.planner.eligible_count(),
            blocked_items: self.planner.blocked_count(),
            selected_items: self.planner.selected_ids().len(),
            validation_complete: self.planner.is_validation_complete(),
            can_validate: self.planner.can_validate(),
            can_deploy: self.planner.can_deploy(),
            failure_detail: self.planner.failure_detail().map(str::to_string),
            tally: self.planner.execution_tally(),
        });

        let backup = self.backup.run_id().map(|run_id| BackupView {
            run_id: run_id.to_string(),
            item_count: self.backup.items().len(),
            restorable_count: self.backup.restorable_count(),
            days_until_expiration: self.backup.days_until_expiration(now),
            urgency: self.backup.urgency(now),
        });

        ViewState {
            owner: session.owner.clone(),
            step: session.workflow_step,
            step_label: session.progress_label(),
            progress_percent: session.progress_percent(),
            completed_steps: session.completed_steps.iter().copied().collect(),
            has_findings,
            scan,
            findings,
            plan,
            deployment_run_id: session.current_deployment_run_id.clone(),
            backup,
        }
    }

    /// Steps a surface may jump to right now
    pub fn navigable_steps(&self) -> Vec<WorkflowStep> {
        [
            WorkflowStep::ScanRunning,
            WorkflowStep::ScanReviewed,
            WorkflowStep::PlanCreated,
            WorkflowStep::Deployed,
            WorkflowStep::BackupManaged,
        ]
        .into_iter()
        .filter(|step| self.session.can_navigate_to(*step))
        .collect()
    }
}
