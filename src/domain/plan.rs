//! Change plan, change items and deployment runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::inventory::matches_search;
use super::state::{ApplyStatus, Eligibility, PlanStatus, RunStatus, ValidationStatus};

/// How far a single plan may move an artifact's API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IncrementPolicy {
    #[default]
    IncrementalOnly,
    AllowJumps,
}

impl FromStr for IncrementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IncrementalOnly" | "incremental" => Ok(IncrementPolicy::IncrementalOnly),
            "AllowJumps" | "jumps" => Ok(IncrementPolicy::AllowJumps),
            _ => Err(format!("Unknown increment policy: {}", s)),
        }
    }
}

impl fmt::Display for IncrementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncrementPolicy::IncrementalOnly => write!(f, "IncrementalOnly"),
            IncrementPolicy::AllowJumps => write!(f, "AllowJumps"),
        }
    }
}

/// Which tests the deploy engine runs while deploying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TestPolicy {
    #[default]
    RunSpecifiedTests,
    RunLocalTests,
    RunAllTestsInOrg,
    NoTestRun,
}

impl FromStr for TestPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RunSpecifiedTests" | "specified" => Ok(TestPolicy::RunSpecifiedTests),
            "RunLocalTests" | "local" => Ok(TestPolicy::RunLocalTests),
            "RunAllTestsInOrg" | "all" => Ok(TestPolicy::RunAllTestsInOrg),
            "NoTestRun" | "none" => Ok(TestPolicy::NoTestRun),
            _ => Err(format!("Unknown test policy: {}", s)),
        }
    }
}

/// A bounded set of API version changes derived from one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlan {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source_scan_id: String,
    pub target_api_version: f64,
    pub increment_policy: IncrementPolicy,
    #[serde(default)]
    pub validate_only: bool,
    #[serde(default)]
    pub test_policy: TestPolicy,
    pub status: PlanStatus,
    #[serde(default)]
    pub total_items: u32,
    /// Fixed at creation time
    pub eligible_items: u32,
    pub created_at: Option<DateTime<Utc>>,
}

impl ChangePlan {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Text search over id and name, as used by the plan selector
    pub fn matches_search(&self, search: &str) -> bool {
        matches_search(search, [Some(self.id.as_str()), self.name.as_deref()])
    }
}

/// One artifact change within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeItem {
    pub id: String,
    pub plan_id: String,
    pub unit_number: u32,
    pub full_name: String,
    pub artifact_type: String,
    pub current_api_version: f64,
    pub target_api_version: f64,
    pub eligibility: Eligibility,
    #[serde(default)]
    pub block_reason: Option<String>,
    pub apply_status: ApplyStatus,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub error_details: Option<String>,
}

impl ChangeItem {
    pub fn is_eligible(&self) -> bool {
        self.eligibility == Eligibility::Eligible
    }

    /// Excluded from execution either by policy or by the deploy engine
    pub fn is_skipped(&self) -> bool {
        self.eligibility == Eligibility::Blocked || self.apply_status == ApplyStatus::Skipped
    }
}

/// Request to create a change plan from a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub scan_id: String,
    pub target_api_version: f64,
    pub increment_policy: IncrementPolicy,
    pub validate_only: bool,
    pub test_policy: TestPolicy,
}

/// A per-item error reported by validation or deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub item_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub message: String,
}

/// Result of the verification step performed before deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub validated_ids: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ItemError>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Filter over change items by eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EligibilityFilter {
    #[default]
    All,
    Only(Eligibility),
}

impl EligibilityFilter {
    pub fn matches(&self, item: &ChangeItem) -> bool {
        match self {
            EligibilityFilter::All => true,
            EligibilityFilter::Only(eligibility) => item.eligibility == *eligibility,
        }
    }
}

impl FromStr for EligibilityFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(EligibilityFilter::All);
        }
        Eligibility::from_str(s).map(EligibilityFilter::Only)
    }
}

/// Execution outcome counts across a plan's items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTally {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecutionTally {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ChangeItem>) -> Self {
        let mut tally = Self::default();
        for item in items {
            if item.is_skipped() {
                tally.skipped += 1;
                continue;
            }
            match item.apply_status {
                ApplyStatus::Applied => tally.applied += 1,
                ApplyStatus::Failed => tally.failed += 1,
                ApplyStatus::Pending | ApplyStatus::Skipped => {}
            }
        }
        tally
    }

    pub fn has_results(&self) -> bool {
        self.applied > 0 || self.failed > 0
    }
}

/// One deploy attempt for a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRun {
    pub id: String,
    pub plan_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub fail_count: u32,
    /// Items submitted with this run
    #[serde(default)]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub backup_enabled: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl DeploymentRun {
    pub fn queued(id: String, plan_id: String, item_ids: Vec<String>, backup_enabled: bool) -> Self {
        Self {
            id,
            plan_id,
            status: RunStatus::Queued,
            error_message: None,
            success_count: 0,
            fail_count: 0,
            item_ids,
            backup_enabled,
            started_at: Some(Utc::now()),
        }
    }

    /// Recount outcomes from item statuses, restricted to this run's items
    pub fn tally_from(&mut self, items: &[ChangeItem]) {
        let mut success = 0;
        let mut failed = 0;
        for item in items.iter().filter(|i| self.item_ids.contains(&i.id)) {
            match item.apply_status {
                ApplyStatus::Applied => success += 1,
                ApplyStatus::Failed => failed += 1,
                ApplyStatus::Pending | ApplyStatus::Skipped => {}
            }
        }
        self.success_count = success;
        self.fail_count = failed;
    }

    pub fn total_processed(&self) -> u32 {
        self.success_count + self.fail_count
    }
}

/// Request sent to the deploy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub plan_id: String,
    pub item_ids: Vec<String>,
    pub create_backup: bool,
}
