//! Boundary to the external scan, plan, deploy and backup engines and the
//! session store.
//!
//! The orchestrator never evaluates compliance rules, diffs artifacts or
//! performs deployments itself. Everything it needs from those systems goes
//! through the traits below, so the coordinator can be driven by the HTTP
//! client in [`http`] or by in-process fakes in tests.

pub mod http;

pub use http::HttpEngineClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    BackupContent, BackupItem, BackupSummary, ChangeItem, ChangePlan, ComplianceMetrics,
    CreatePlanRequest, DeploymentRun, DiffResult, ExecuteRequest, Finding, FindingsSummary,
    InventoryCounts, NamespacePolicy, OrchestratorError, RestoreResult, Scan, ScanRequest, Session,
    ValidationResult, VersionDistribution,
};

/// Errors returned by the external engines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

impl EngineError {
    /// Message reported by the engine itself, if any
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            EngineError::Api { message, .. } if !message.trim().is_empty() => Some(message.trim()),
            EngineError::NotFound(message) => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            EngineError::Parse(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

impl From<EngineError> for OrchestratorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(message) => OrchestratorError::NotFound(message),
            EngineError::Api { message, .. } if !message.trim().is_empty() => {
                OrchestratorError::RemoteExecution(message)
            }
            other => OrchestratorError::RemoteExecution(other.to_string()),
        }
    }
}

/// Errors returned by the session store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt session record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}

/// Scan engine: starts scans and reports their progress and findings
#[async_trait]
pub trait ScanEngine: Send + Sync {
    /// Queue a scan and return its id
    async fn start_scan(&self, request: &ScanRequest) -> Result<String, EngineError>;

    /// Current state of a scan. `None` when the scan no longer exists.
    async fn get_scan_status(&self, scan_id: &str) -> Result<Option<Scan>, EngineError>;

    async fn cancel_scan(&self, scan_id: &str) -> Result<(), EngineError>;

    async fn get_findings_by_scan(&self, scan_id: &str) -> Result<Vec<Finding>, EngineError>;

    async fn get_findings_summary(&self, scan_id: &str) -> Result<FindingsSummary, EngineError>;

    /// Most recent scans, newest first
    async fn get_recent_scans(&self, limit: u32) -> Result<Vec<Scan>, EngineError>;

    /// Artifact counts per type across the whole org
    async fn get_inventory_counts(&self) -> Result<InventoryCounts, EngineError>;

    async fn get_version_distribution(&self, artifact_type: &str) -> Result<VersionDistribution, EngineError>;

    async fn get_compliance_metrics(
        &self,
        target_api_version: f64,
        scope: NamespacePolicy,
    ) -> Result<ComplianceMetrics, EngineError>;
}

/// Plan engine: builds change plans and reports deployment outcomes
#[async_trait]
pub trait PlanEngine: Send + Sync {
    /// Create a plan from a scan. Eligibility of every item is computed here.
    async fn create_change_plan(&self, request: &CreatePlanRequest) -> Result<String, EngineError>;

    async fn get_change_plan(&self, plan_id: &str) -> Result<ChangePlan, EngineError>;

    async fn get_change_items(&self, plan_id: &str) -> Result<Vec<ChangeItem>, EngineError>;

    /// Clear per-run error state so the plan can be deployed again
    async fn reset_plan_for_retry(&self, plan_id: &str) -> Result<(), EngineError>;

    /// Items of the plan that carry error details, in unit order
    async fn get_deployment_errors_for_plan(&self, plan_id: &str) -> Result<Vec<ChangeItem>, EngineError>;

    async fn get_deployment_run_details(&self, run_id: &str) -> Result<DeploymentRun, EngineError>;

    /// Most recent plans, newest first
    async fn get_plan_history(&self, limit: u32) -> Result<Vec<ChangePlan>, EngineError>;
}

/// Deploy engine: verifies and applies a plan's selected items
#[async_trait]
pub trait DeployEngine: Send + Sync {
    /// Check-only deployment of the given items
    async fn validate(&self, plan_id: &str, item_ids: &[String]) -> Result<ValidationResult, EngineError>;

    /// Start executing the plan and return the deployment run id
    async fn execute_plan_with_backup(&self, request: &ExecuteRequest) -> Result<String, EngineError>;
}

/// Backup engine: pre-deployment snapshots for one deployment run
#[async_trait]
pub trait BackupEngine: Send + Sync {
    async fn get_backup_summary(&self, run_id: &str) -> Result<BackupSummary, EngineError>;

    async fn get_backup_items(&self, run_id: &str) -> Result<Vec<BackupItem>, EngineError>;

    async fn get_backup_content(&self, backup_item_id: &str) -> Result<BackupContent, EngineError>;

    async fn get_diff(&self, backup_item_id: &str) -> Result<DiffResult, EngineError>;

    async fn restore_item(&self, backup_item_id: &str) -> Result<RestoreResult, EngineError>;

    /// Restore every item of the run. Per-item failures are reported in the results.
    async fn restore_all(&self, run_id: &str) -> Result<Vec<RestoreResult>, EngineError>;

    /// Irreversibly delete the backup set
    async fn cleanup_backup(&self, run_id: &str) -> Result<(), EngineError>;

    async fn create_backup_for_deployment(&self, run_id: &str) -> Result<BackupSummary, EngineError>;
}

/// Durable store for the per-owner session record
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_current_session(&self, owner: &str) -> Result<Option<Session>, StoreError>;

    /// Write the whole record atomically
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn clear_session(&self, owner: &str) -> Result<(), StoreError>;
}
