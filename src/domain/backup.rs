//! Backup set domain model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Whether a backed-up artifact has been put back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreStatus {
    NotRestored,
    Restored,
}

/// Pre-deployment snapshot of one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupItem {
    pub id: String,
    pub deployment_run_id: String,
    pub full_name: String,
    pub artifact_type: String,
    pub original_api_version: f64,
    pub backup_created_at: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub restore_status: RestoreStatus,
    #[serde(default)]
    pub restored_at: Option<DateTime<Utc>>,
}

impl BackupItem {
    pub fn is_restorable(&self) -> bool {
        self.restore_status == RestoreStatus::NotRestored
    }
}

/// Creation and expiration of a backup set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub deployment_run_id: String,
    pub backup_created_at: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub item_count: u32,
}

impl BackupSummary {
    /// Summary for a set created at `created_at` with a fixed retention window
    pub fn created(deployment_run_id: String, created_at: DateTime<Utc>, retention_days: i64) -> Self {
        Self {
            deployment_run_id,
            backup_created_at: Some(created_at),
            expiration_date: Some(expiration_for(created_at, retention_days)),
            item_count: 0,
        }
    }

    pub fn has_backup_data(&self) -> bool {
        self.backup_created_at.is_some()
    }

    /// Whole days left before expiration, rounded up. Zero when unknown.
    pub fn days_until_expiration(&self, now: DateTime<Utc>) -> i64 {
        match self.expiration_date {
            Some(expiration) => days_until(expiration, now),
            None => 0,
        }
    }
}

/// Expiration is fixed at creation time
pub fn expiration_for(created_at: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
    created_at + Duration::days(retention_days)
}

/// Days between `now` and `expiration`, rounded up like a calendar countdown
pub fn days_until(expiration: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (expiration - now).num_seconds();
    let day = 86_400;
    if seconds > 0 {
        (seconds + day - 1) / day
    } else {
        seconds / day
    }
}

/// How urgently a backup set needs attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationUrgency {
    Urgent,
    Warning,
    Normal,
}

impl ExpirationUrgency {
    pub fn classify(days_remaining: i64, urgent_days: i64, warning_days: i64) -> Self {
        if days_remaining <= urgent_days {
            ExpirationUrgency::Urgent
        } else if days_remaining <= warning_days {
            ExpirationUrgency::Warning
        } else {
            ExpirationUrgency::Normal
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ExpirationUrgency::Urgent => "slds-text-color_error",
            ExpirationUrgency::Warning => "slds-text-color_warning",
            ExpirationUrgency::Normal => "",
        }
    }
}

/// Stored content of a backed-up artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupContent {
    pub backup_item_id: String,
    pub full_name: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<String>,
}

/// Difference between a backup and the artifact as currently deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub has_content_changes: bool,
    pub has_metadata_changes: bool,
    #[serde(default)]
    pub content_diff: Option<String>,
    #[serde(default)]
    pub metadata_diff: Option<String>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        self.has_content_changes || self.has_metadata_changes
    }
}

/// Outcome of restoring one backup item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub backup_item_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Aggregate of a bulk restore. Partial success is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub results: Vec<RestoreResult>,
    pub success_count: usize,
    pub fail_count: usize,
}

impl RestoreReport {
    pub fn from_results(results: Vec<RestoreResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let fail_count = results.len() - success_count;
        Self {
            results,
            success_count,
            fail_count,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.success_count > 0 && self.fail_count > 0
    }

    pub fn message(&self) -> String {
        if self.fail_count > 0 {
            format!("Restored {} items, {} failed", self.success_count, self.fail_count)
        } else {
            format!("Restored {} items", self.success_count)
        }
    }
}
