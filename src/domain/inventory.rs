//! Org inventory: artifact counts, API version spread and compliance against a target

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::scan::NamespacePolicy;

/// Number of artifacts of each type in the org
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryCounts(pub BTreeMap<String, u32>);

impl InventoryCounts {
    pub fn count(&self, artifact_type: &str) -> u32 {
        self.0.get(artifact_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(t, c)| (t.as_str(), *c))
    }
}

/// Artifacts of one type per API version, keyed by the version as the engine prints it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionDistribution {
    pub artifact_type: String,
    pub counts: BTreeMap<String, u32>,
}

/// One row of a distribution chart
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionBar {
    pub version: String,
    pub count: u32,
    /// Relative to the largest bucket, 0-100
    pub percentage: u32,
    pub below_target: bool,
}

impl VersionDistribution {
    pub fn new(artifact_type: impl Into<String>, counts: BTreeMap<String, u32>) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            counts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Artifacts on a version lower than `target`
    pub fn below_target_count(&self, target: f64) -> u32 {
        self.parsed()
            .filter(|(version, _, _)| *version < target)
            .map(|(_, _, count)| count)
            .sum()
    }

    /// Newest versions first, at most `limit` bars
    pub fn bars(&self, target: f64, limit: usize) -> Vec<VersionBar> {
        let max = self.counts.values().copied().max().unwrap_or(0).max(1);
        let mut parsed: Vec<_> = self.parsed().collect();
        parsed.sort_by(|a, b| b.0.total_cmp(&a.0));

        parsed
            .into_iter()
            .take(limit)
            .map(|(version, label, count)| VersionBar {
                version: label.to_string(),
                count,
                percentage: ((count as f64 / max as f64) * 100.0).round() as u32,
                below_target: version < target,
            })
            .collect()
    }

    fn parsed(&self) -> impl Iterator<Item = (f64, &str, u32)> {
        self.counts
            .iter()
            .filter_map(|(label, count)| label.trim().parse::<f64>().ok().map(|v| (v, label.as_str(), *count)))
    }
}

/// How much of the scoped inventory already meets the target API version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetrics {
    pub target_api_version: f64,
    #[serde(default)]
    pub scope_policy: NamespacePolicy,
    #[serde(default)]
    pub total_components: u32,
    #[serde(default)]
    pub compliant_components: u32,
    /// Per artifact type, artifacts still below the target
    #[serde(default)]
    pub below_target_by_type: BTreeMap<String, u32>,
}

impl ComplianceMetrics {
    pub fn non_compliant(&self) -> u32 {
        self.total_components.saturating_sub(self.compliant_components)
    }

    /// Compliant share, 0-100. An empty scope counts as fully compliant.
    pub fn compliance_percent(&self) -> u32 {
        if self.total_components == 0 {
            return 100;
        }
        let ratio = self.compliant_components as f64 / self.total_components as f64;
        (ratio * 100.0).round().min(100.0) as u32
    }
}

/// Case-insensitive match of `search` against any candidate. Blank searches match.
pub fn matches_search<'a>(search: &str, candidates: impl IntoIterator<Item = Option<&'a str>>) -> bool {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    candidates
        .into_iter()
        .flatten()
        .any(|c| c.to_lowercase().contains(&needle))
}
