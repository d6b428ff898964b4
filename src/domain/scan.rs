//! Scan domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::OrchestratorError;
use super::inventory::matches_search;
use super::state::ScanStatus;

/// Upper bound accepted for any API version input
pub const MAX_API_VERSION: f64 = 200.0;

/// Artifact types scanned when the caller does not choose any
pub const DEFAULT_ARTIFACT_TYPES: [&str; 4] = ["ApexClass", "ApexTrigger", "ApexPage", "ApexComponent"];

/// Which artifacts a scan looks at, by namespace ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NamespacePolicy {
    #[default]
    CustomOnly,
    PackageOnly,
    All,
}

impl fmt::Display for NamespacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespacePolicy::CustomOnly => write!(f, "CustomOnly"),
            NamespacePolicy::PackageOnly => write!(f, "PackageOnly"),
            NamespacePolicy::All => write!(f, "All"),
        }
    }
}

impl FromStr for NamespacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CustomOnly" | "custom-only" => Ok(NamespacePolicy::CustomOnly),
            "PackageOnly" | "package-only" => Ok(NamespacePolicy::PackageOnly),
            "All" | "all" => Ok(NamespacePolicy::All),
            _ => Err(format!("Unknown namespace policy: {}", s)),
        }
    }
}

/// Baseline a scan compares against for drift detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BaselineMode {
    #[default]
    LastScan,
    None,
}

/// A scan as reported by the scan engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: ScanStatus,
    pub target_api_version: f64,
    #[serde(default)]
    pub included_types: Vec<String>,
    #[serde(default)]
    pub namespace_policy: NamespacePolicy,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_artifacts: u32,
    #[serde(default)]
    pub processed_artifacts: u32,
    #[serde(default)]
    pub findings_count: u32,
    #[serde(default)]
    pub alerts_count: u32,
}

impl Scan {
    /// Local placeholder for a scan that was just queued and not yet polled
    pub fn queued(id: String, request: &ScanRequest) -> Self {
        Self {
            id,
            name: None,
            status: ScanStatus::Queued,
            target_api_version: request.target_api_version,
            included_types: request.types.clone(),
            namespace_policy: request.namespace_policy,
            started_at: Some(Utc::now()),
            total_artifacts: 0,
            processed_artifacts: 0,
            findings_count: 0,
            alerts_count: 0,
        }
    }

    /// Processed share of artifacts, 0-100
    pub fn progress_percent(&self) -> u32 {
        if self.total_artifacts == 0 {
            return 0;
        }
        let ratio = self.processed_artifacts as f64 / self.total_artifacts as f64;
        (ratio * 100.0).round().min(100.0) as u32
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Text search over id and name, as used by the scan selector
    pub fn matches_search(&self, search: &str) -> bool {
        matches_search(search, [Some(self.id.as_str()), self.name.as_deref()])
    }
}

/// Request to start a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub types: Vec<String>,
    pub namespace_policy: NamespacePolicy,
    pub target_api_version: f64,
    pub min_api_version: Option<f64>,
    pub max_api_version: Option<f64>,
    pub baseline_mode: BaselineMode,
    pub include_content: bool,
}

impl ScanRequest {
    pub fn new(types: Vec<String>, target_api_version: f64) -> Self {
        Self {
            types,
            namespace_policy: NamespacePolicy::default(),
            target_api_version,
            min_api_version: None,
            max_api_version: None,
            baseline_mode: BaselineMode::default(),
            include_content: true,
        }
    }

    pub fn with_namespace_policy(mut self, policy: NamespacePolicy) -> Self {
        self.namespace_policy = policy;
        self
    }

    pub fn with_min_api_version(mut self, version: f64) -> Self {
        self.min_api_version = Some(version);
        self
    }

    /// Check the request before anything is sent to the scan engine
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.types.iter().all(|t| t.trim().is_empty()) {
            return Err(OrchestratorError::validation(
                "Select at least one artifact type to scan",
            ));
        }

        check_version("Target API version", self.target_api_version)?;

        if let Some(min) = self.min_api_version {
            check_version("Minimum API version", min)?;
            if min >= self.target_api_version {
                return Err(OrchestratorError::validation(
                    "Minimum API version must be less than the target version",
                ));
            }
        }

        if let Some(max) = self.max_api_version {
            check_version("Maximum API version", max)?;
            if let Some(min) = self.min_api_version {
                if max < min {
                    return Err(OrchestratorError::validation(
                        "Maximum API version must not be below the minimum version",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn check_version(label: &str, value: f64) -> Result<(), OrchestratorError> {
    if !value.is_finite() {
        return Err(OrchestratorError::validation(format!("{} must be a number", label)));
    }
    if value <= 0.0 {
        return Err(OrchestratorError::validation(format!(
            "{} must be a positive number",
            label
        )));
    }
    if value >= MAX_API_VERSION {
        return Err(OrchestratorError::validation(format!(
            "{} must be below {}",
            label, MAX_API_VERSION
        )));
    }
    Ok(())
}
