//! Status enumerations for scans, plans, items and deployment runs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a scan. Advanced only by the external scan engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    /// Returns whether the scan engine will never change this status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    /// Returns whether the scan is still being worked on
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Queued | ScanStatus::Running)
    }

    pub fn badge(&self) -> Badge {
        match self {
            ScanStatus::Queued | ScanStatus::Running => Badge::Pending,
            ScanStatus::Completed => Badge::Success,
            ScanStatus::Failed | ScanStatus::Cancelled => Badge::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "Queued",
            ScanStatus::Running => "Running",
            ScanStatus::Completed => "Completed",
            ScanStatus::Failed => "Failed",
            ScanStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(ScanStatus::Queued),
            "Running" => Ok(ScanStatus::Running),
            "Completed" => Ok(ScanStatus::Completed),
            "Failed" => Ok(ScanStatus::Failed),
            "Cancelled" => Ok(ScanStatus::Cancelled),
            _ => Err(format!("Unknown scan status: {}", s)),
        }
    }
}

/// Lifecycle of a change plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    Draft,
    Ready,
    Validated,
    Deploying,
    Executing,
    Deployed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    /// Terminal for cancellation purposes. `Failed` still has the retry exit.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Deployed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }

    /// Statuses from which a validation may be requested
    pub fn accepts_validation(&self) -> bool {
        matches!(self, PlanStatus::Draft | PlanStatus::Ready)
    }

    /// Returns whether a deployment is in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(self, PlanStatus::Deploying | PlanStatus::Executing)
    }

    pub fn badge(&self) -> Badge {
        match self {
            PlanStatus::Draft | PlanStatus::Ready | PlanStatus::Validated => Badge::Info,
            PlanStatus::Deploying | PlanStatus::Executing => Badge::Pending,
            PlanStatus::Deployed => Badge::Success,
            PlanStatus::Failed => Badge::Error,
            PlanStatus::Cancelled => Badge::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "Draft",
            PlanStatus::Ready => "Ready",
            PlanStatus::Validated => "Validated",
            PlanStatus::Deploying => "Deploying",
            PlanStatus::Executing => "Executing",
            PlanStatus::Deployed => "Deployed",
            PlanStatus::Failed => "Failed",
            PlanStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(PlanStatus::Draft),
            "Ready" => Ok(PlanStatus::Ready),
            "Validated" => Ok(PlanStatus::Validated),
            "Deploying" => Ok(PlanStatus::Deploying),
            "Executing" => Ok(PlanStatus::Executing),
            "Deployed" => Ok(PlanStatus::Deployed),
            "Failed" => Ok(PlanStatus::Failed),
            "Cancelled" => Ok(PlanStatus::Cancelled),
            _ => Err(format!("Unknown plan status: {}", s)),
        }
    }
}

/// Status of a single deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn badge(&self) -> Badge {
        match self {
            RunStatus::Queued | RunStatus::Running => Badge::Pending,
            RunStatus::Succeeded => Badge::Success,
            RunStatus::Failed => Badge::Error,
            RunStatus::Cancelled => Badge::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "Queued",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Precomputed, immutable classification of a change item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eligibility {
    Eligible,
    Blocked,
}

impl FromStr for Eligibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Eligible" | "eligible" => Ok(Eligibility::Eligible),
            "Blocked" | "blocked" => Ok(Eligibility::Blocked),
            _ => Err(format!("Unknown eligibility: {}", s)),
        }
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Eligible => write!(f, "Eligible"),
            Eligibility::Blocked => write!(f, "Blocked"),
        }
    }
}

/// Outcome of deployment execution for a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyStatus {
    Pending,
    Applied,
    Failed,
    Skipped,
}

impl ApplyStatus {
    pub fn badge(&self) -> Badge {
        match self {
            ApplyStatus::Pending | ApplyStatus::Skipped => Badge::Neutral,
            ApplyStatus::Applied => Badge::Success,
            ApplyStatus::Failed => Badge::Error,
        }
    }
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyStatus::Pending => write!(f, "Pending"),
            ApplyStatus::Applied => write!(f, "Applied"),
            ApplyStatus::Failed => write!(f, "Failed"),
            ApplyStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Per-item result of the validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValidationStatus {
    #[default]
    NotValidated,
    Passed,
    Failed,
}

/// Visual classification shared by every status type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Success,
    Pending,
    Info,
    Error,
    Neutral,
}

impl Badge {
    pub fn css_class(&self) -> &'static str {
        match self {
            Badge::Success => "status-badge status-success",
            Badge::Pending => "status-badge status-pending",
            Badge::Info => "status-badge status-info",
            Badge::Error => "status-badge status-error",
            Badge::Neutral => "status-badge status-neutral",
        }
    }
}

/// Triggers that move a change plan between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanTrigger {
    MarkReady,
    ValidationPassed,
    ValidationFailed,
    SelectionChanged,
    StartDeploy,
    ExecutionStarted,
    DeploySucceeded,
    DeployFailed,
    Cancel,
    ResetForRetry,
}

impl fmt::Display for PlanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanTrigger::MarkReady => "MarkReady",
            PlanTrigger::ValidationPassed => "ValidationPassed",
            PlanTrigger::ValidationFailed => "ValidationFailed",
            PlanTrigger::SelectionChanged => "SelectionChanged",
            PlanTrigger::StartDeploy => "StartDeploy",
            PlanTrigger::ExecutionStarted => "ExecutionStarted",
            PlanTrigger::DeploySucceeded => "DeploySucceeded",
            PlanTrigger::DeployFailed => "DeployFailed",
            PlanTrigger::Cancel => "Cancel",
            PlanTrigger::ResetForRetry => "ResetForRetry",
        };
        write!(f, "{}", name)
    }
}

/// Guard conditions that must hold for a plan transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    HasEligibleSelection,
    ValidationComplete,
}

/// Side effects the planner applies after a plan transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanEffect {
    /// Mark the current selection as not yet validated
    ResetValidation,
    /// Drop cached failure text and per-item validation errors
    ClearFailureDetail,
    /// Fetch the richest available failure text from the engines
    LoadFailureDetail,
}
