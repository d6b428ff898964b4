//! Findings aggregator: loads a scan's findings and derives summaries

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{Finding, FindingCategory, FindingFilter, FindingsSummary, OrchestratorError, Severity};
use crate::engine::ScanEngine;

/// Last successfully loaded findings for one scan
pub struct FindingsAggregator {
    engine: Arc<dyn ScanEngine>,
    scan_id: Option<String>,
    findings: Vec<Finding>,
    summary: FindingsSummary,
}

impl FindingsAggregator {
    pub fn new(engine: Arc<dyn ScanEngine>) -> Self {
        Self {
            engine,
            scan_id: None,
            findings: Vec::new(),
            summary: FindingsSummary::default(),
        }
    }

    /// Fetch findings and summary together. On failure the previously loaded
    /// data is kept and the error is returned.
    pub async fn load_results(&mut self, scan_id: &str) -> Result<(&[Finding], &FindingsSummary), OrchestratorError> {
        let loaded = futures::try_join!(
            self.engine.get_findings_by_scan(scan_id),
            self.engine.get_findings_summary(scan_id),
        );

        match loaded {
            Ok((findings, summary)) => {
                info!("Loaded {} findings for scan {}", findings.len(), scan_id);
                self.scan_id = Some(scan_id.to_string());
                self.findings = findings;
                self.summary = summary;
                Ok((&self.findings, &self.summary))
            }
            Err(e) => {
                warn!("Failed to load findings for scan {}: {}", scan_id, e);
                Err(e.into())
            }
        }
    }

    pub fn scan_id(&self) -> Option<&str> {
        self.scan_id.as_deref()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn summary(&self) -> &FindingsSummary {
        &self.summary
    }

    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    pub fn count(&self, severity: Severity) -> u32 {
        self.summary.count(severity)
    }

    pub fn has_blocking_findings(&self) -> bool {
        self.findings.iter().any(|f| f.is_blocking)
    }

    pub fn filtered<'a>(&'a self, filter: &'a FindingFilter) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| filter.matches(f))
    }

    /// Findings keyed by artifact, for cross-referencing with inventory views
    pub fn by_artifact(&self) -> BTreeMap<&str, Vec<&Finding>> {
        let mut grouped: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in &self.findings {
            grouped.entry(finding.artifact_name.as_str()).or_default().push(finding);
        }
        grouped
    }

    pub fn category_counts(&self) -> BTreeMap<FindingCategory, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&mut self) {
        self.scan_id = None;
        self.findings.clear();
        self.summary = FindingsSummary::default();
    }
}
