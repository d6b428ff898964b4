//! Durable per-user workflow session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The five workflow steps, plus the not-started state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum WorkflowStep {
    #[default]
    NotStarted = 0,
    ScanRunning = 1,
    ScanReviewed = 2,
    PlanCreated = 3,
    Deployed = 4,
    BackupManaged = 5,
}

impl WorkflowStep {
    pub const LAST: WorkflowStep = WorkflowStep::BackupManaged;

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkflowStep::NotStarted => "Not Started",
            WorkflowStep::ScanRunning => "Run Scan",
            WorkflowStep::ScanReviewed => "Review Findings",
            WorkflowStep::PlanCreated => "Create Plan",
            WorkflowStep::Deployed => "Deploy",
            WorkflowStep::BackupManaged => "Manage Backup",
        }
    }

    /// Steps strictly before this one, excluding not-started
    pub fn predecessors(&self) -> impl Iterator<Item = WorkflowStep> {
        let upper = self.number();
        (1..upper).filter_map(|n| WorkflowStep::try_from(n).ok())
    }
}

impl From<WorkflowStep> for u8 {
    fn from(step: WorkflowStep) -> u8 {
        step as u8
    }
}

impl TryFrom<u8> for WorkflowStep {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WorkflowStep::NotStarted),
            1 => Ok(WorkflowStep::ScanRunning),
            2 => Ok(WorkflowStep::ScanReviewed),
            3 => Ok(WorkflowStep::PlanCreated),
            4 => Ok(WorkflowStep::Deployed),
            5 => Ok(WorkflowStep::BackupManaged),
            _ => Err(format!("Workflow step out of range: {}", value)),
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStep::NotStarted => write!(f, "{}", self.label()),
            _ => write!(
                f,
                "Step {} of {}: {}",
                self.number(),
                WorkflowStep::LAST.number(),
                self.label()
            ),
        }
    }
}

/// Pointers to the active scan, plan and deployment run for one owner.
///
/// The only state that survives a client going away. `workflow_step` never
/// decreases except through [`Session::clear`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub owner: String,
    pub workflow_step: WorkflowStep,
    #[serde(default)]
    pub completed_steps: BTreeSet<WorkflowStep>,
    pub current_scan_id: Option<String>,
    pub current_change_plan_id: Option<String>,
    pub current_deployment_run_id: Option<String>,
    #[serde(default)]
    pub has_backup: bool,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            workflow_step: WorkflowStep::NotStarted,
            completed_steps: BTreeSet::new(),
            current_scan_id: None,
            current_change_plan_id: None,
            current_deployment_run_id: None,
            has_backup: false,
            updated_at: Utc::now(),
        }
    }

    /// Move forward to `step`, marking every earlier step complete.
    /// Returns whether the current step changed.
    pub fn advance_to(&mut self, step: WorkflowStep) -> bool {
        self.completed_steps.extend(step.predecessors());
        self.updated_at = Utc::now();
        if step > self.workflow_step {
            self.workflow_step = step;
            true
        } else {
            false
        }
    }

    /// Point the session at a scan. A different scan drops every pointer that
    /// depended on the previous one.
    pub fn set_scan(&mut self, scan_id: &str) {
        if self.current_scan_id.as_deref() != Some(scan_id) {
            self.current_scan_id = Some(scan_id.to_string());
            self.current_change_plan_id = None;
            self.clear_deployment();
        }
        self.updated_at = Utc::now();
    }

    /// Point the session at a plan. A different plan drops the deployment
    /// and backup pointers.
    pub fn set_plan(&mut self, plan_id: &str) {
        if self.current_change_plan_id.as_deref() != Some(plan_id) {
            self.current_change_plan_id = Some(plan_id.to_string());
            self.clear_deployment();
        }
        self.updated_at = Utc::now();
    }

    pub fn set_deployment_run(&mut self, run_id: &str, has_backup: bool) {
        self.current_deployment_run_id = Some(run_id.to_string());
        self.has_backup = has_backup;
        self.updated_at = Utc::now();
    }

    fn clear_deployment(&mut self) {
        self.current_deployment_run_id = None;
        self.has_backup = false;
    }

    /// Reset every pointer and step. The only way the step goes backwards.
    pub fn clear(&mut self) {
        let owner = std::mem::take(&mut self.owner);
        *self = Session::new(owner);
    }

    pub fn is_step_complete(&self, step: WorkflowStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Backward navigation is allowed to any completed step
    pub fn can_navigate_to(&self, step: WorkflowStep) -> bool {
        step <= self.workflow_step || self.is_step_complete(step)
    }

    /// Progress across steps 1 to 5 as a rounded percentage
    pub fn progress_percent(&self) -> u32 {
        let step = self.workflow_step.number();
        if step == 0 {
            return 0;
        }
        let span = (WorkflowStep::LAST.number() - 1) as f64;
        (((step - 1) as f64 / span) * 100.0).round() as u32
    }

    pub fn progress_label(&self) -> String {
        self.workflow_step.to_string()
    }
}
