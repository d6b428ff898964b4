//! Inventory tracker: org-wide artifact counts, API version distribution and
//! compliance against the target version

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{ComplianceMetrics, InventoryCounts, NamespacePolicy, OrchestratorError, VersionDistribution};
use crate::engine::ScanEngine;

/// Which secondary read failed during a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryPart {
    Distribution,
    Compliance,
}

impl InventoryPart {
    pub fn title(&self) -> &'static str {
        match self {
            InventoryPart::Distribution => "Version Distribution Error",
            InventoryPart::Compliance => "Compliance Metrics Error",
        }
    }
}

pub struct InventoryTracker {
    engine: Arc<dyn ScanEngine>,
    counts: InventoryCounts,
    distribution: VersionDistribution,
    compliance: Option<ComplianceMetrics>,
}

impl InventoryTracker {
    pub fn new(engine: Arc<dyn ScanEngine>) -> Self {
        Self {
            engine,
            counts: InventoryCounts::default(),
            distribution: VersionDistribution::default(),
            compliance: None,
        }
    }

    pub fn counts(&self) -> &InventoryCounts {
        &self.counts
    }

    pub fn distribution(&self) -> &VersionDistribution {
        &self.distribution
    }

    pub fn compliance(&self) -> Option<&ComplianceMetrics> {
        self.compliance.as_ref()
    }

    /// Reload counts, then distribution and compliance together.
    ///
    /// A counts failure is returned as an error and leaves everything as it
    /// was. Distribution and compliance failures clear only that part and are
    /// reported back alongside the others.
    pub async fn refresh(
        &mut self,
        artifact_type: &str,
        target_api_version: f64,
        scope: NamespacePolicy,
    ) -> Result<Vec<(InventoryPart, OrchestratorError)>, OrchestratorError> {
        self.counts = self.engine.get_inventory_counts().await?;
        info!(
            "Inventory holds {} artifacts across {} types",
            self.counts.total(),
            self.counts.0.len()
        );

        let (distribution, compliance) = futures::join!(
            self.engine.get_version_distribution(artifact_type),
            self.engine.get_compliance_metrics(target_api_version, scope),
        );

        let mut failures = Vec::new();
        match distribution {
            Ok(distribution) => self.distribution = distribution,
            Err(e) => {
                warn!("Failed to load version distribution for {}: {}", artifact_type, e);
                self.distribution = VersionDistribution::default();
                failures.push((InventoryPart::Distribution, e.into()));
            }
        }
        match compliance {
            Ok(metrics) => self.compliance = Some(metrics),
            Err(e) => {
                warn!("Failed to load compliance metrics: {}", e);
                self.compliance = None;
                failures.push((InventoryPart::Compliance, e.into()));
            }
        }
        Ok(failures)
    }

    /// Switch the distribution to another artifact type
    pub async fn select_type(&mut self, artifact_type: &str) -> Result<&VersionDistribution, OrchestratorError> {
        match self.engine.get_version_distribution(artifact_type).await {
            Ok(distribution) => {
                self.distribution = distribution;
                Ok(&self.distribution)
            }
            Err(e) => {
                self.distribution = VersionDistribution::default();
                Err(e.into())
            }
        }
    }
}
