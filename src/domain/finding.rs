//! Findings produced by a scan

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of compliance issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingCategory {
    BreakingChange,
    Deprecation,
    VersionRisk,
    Drift,
    CodeQuality,
}

impl FindingCategory {
    pub fn label(&self) -> &'static str {
        match self {
            FindingCategory::BreakingChange => "Breaking Change",
            FindingCategory::Deprecation => "Deprecation",
            FindingCategory::VersionRisk => "Version Risk",
            FindingCategory::Drift => "Drift",
            FindingCategory::CodeQuality => "Code Quality",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for FindingCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BreakingChange" | "breaking-change" => Ok(FindingCategory::BreakingChange),
            "Deprecation" | "deprecation" => Ok(FindingCategory::Deprecation),
            "VersionRisk" | "version-risk" => Ok(FindingCategory::VersionRisk),
            "Drift" | "drift" => Ok(FindingCategory::Drift),
            "CodeQuality" | "code-quality" => Ok(FindingCategory::CodeQuality),
            _ => Err(format!("Unknown finding category: {}", s)),
        }
    }
}

/// Finding severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "Critical"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Info => write!(f, "Info"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Critical" | "critical" => Ok(Severity::Critical),
            "Warning" | "warning" => Ok(Severity::Warning),
            "Info" | "info" => Ok(Severity::Info),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// A single compliance issue tied to one artifact and one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub scan_id: String,
    pub artifact_name: String,
    pub category: FindingCategory,
    pub severity: Severity,
    #[serde(default)]
    pub is_blocking: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub rule_id: String,
}

/// Count of findings per severity, as reported by the scan engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingsSummary(pub BTreeMap<Severity, u32>);

impl FindingsSummary {
    /// Count for a severity; absent keys count as zero
    pub fn count(&self, severity: Severity) -> u32 {
        self.0.get(&severity).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    /// Build a summary locally from a list of findings
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = BTreeMap::new();
        for finding in findings {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        Self(counts)
    }
}

/// Filter applied to a findings list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindingFilter {
    pub severity: Option<Severity>,
    pub category: Option<FindingCategory>,
    pub search: Option<String>,
}

impl FindingFilter {
    pub fn matches(&self, finding: &Finding) -> bool {
        if let Some(severity) = self.severity {
            if finding.severity != severity {
                return false;
            }
        }
        if let Some(category) = self.category {
            if finding.category != category {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(search) if !search.is_empty() => {
                let needle = search.to_lowercase();
                finding.artifact_name.to_lowercase().contains(&needle)
                    || finding.summary.to_lowercase().contains(&needle)
                    || finding.rule_id.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}
