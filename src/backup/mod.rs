//! Backup/restore manager for the backup set of one deployment run

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::domain::{
    expiration_for, BackupContent, BackupItem, BackupSummary, DiffResult, ExpirationUrgency,
    OrchestratorError, RestoreReport, RestoreResult,
};
use crate::engine::{BackupEngine, EngineError};
use crate::events::{Event, EventBus, NoticeLevel};

pub struct BackupManager {
    engine: Arc<dyn BackupEngine>,
    events: EventBus,
    policy: BackupConfig,
    run_id: Option<String>,
    summary: Option<BackupSummary>,
    items: Vec<BackupItem>,
}

impl BackupManager {
    pub fn new(engine: Arc<dyn BackupEngine>, events: EventBus, policy: BackupConfig) -> Self {
        Self {
            engine,
            events,
            policy,
            run_id: None,
            summary: None,
            items: Vec::new(),
        }
    }

    /// Scope the manager to a deployment run. Switching runs drops loaded data.
    pub fn bind(&mut self, run_id: &str) {
        if self.run_id.as_deref() != Some(run_id) {
            self.run_id = Some(run_id.to_string());
            self.summary = None;
            self.items.clear();
        }
    }

    pub fn unbind(&mut self) {
        self.run_id = None;
        self.summary = None;
        self.items.clear();
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn require_run(&self) -> Result<String, OrchestratorError> {
        self.run_id
            .clone()
            .ok_or_else(|| OrchestratorError::not_found("No deployment run with a backup is selected"))
    }

    /// Fetch summary and items for the bound run
    pub async fn load(&mut self) -> Result<(), OrchestratorError> {
        let run_id = self.require_run()?;
        let (summary, items) = futures::try_join!(
            self.engine.get_backup_summary(&run_id),
            self.engine.get_backup_items(&run_id),
        )?;

        self.summary = Some(self.normalize(summary));
        self.items = items;
        Ok(())
    }

    /// Fill in an expiration the engine left out, from the creation time
    fn normalize(&self, mut summary: BackupSummary) -> BackupSummary {
        if summary.expiration_date.is_none() {
            if let Some(created) = summary.backup_created_at {
                summary.expiration_date = Some(expiration_for(created, self.policy.retention_days));
            }
        }
        summary
    }

    /// Reload after a mutation, logging rather than failing
    async fn reload(&mut self) {
        if let Err(e) = self.load().await {
            warn!("Failed to reload backup data: {}", e);
        }
    }

    pub fn summary(&self) -> Option<&BackupSummary> {
        self.summary.as_ref()
    }

    pub fn items(&self) -> &[BackupItem] {
        &self.items
    }

    pub fn has_backup_data(&self) -> bool {
        self.summary.as_ref().map(|s| s.has_backup_data()).unwrap_or(false) || !self.items.is_empty()
    }

    pub fn restorable_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_restorable()).count()
    }

    pub fn days_until_expiration(&self, now: DateTime<Utc>) -> Option<i64> {
        self.summary
            .as_ref()
            .filter(|s| s.expiration_date.is_some())
            .map(|s| s.days_until_expiration(now))
    }

    pub fn urgency(&self, now: DateTime<Utc>) -> Option<ExpirationUrgency> {
        self.days_until_expiration(now).map(|days| {
            ExpirationUrgency::classify(days, self.policy.urgent_days, self.policy.warning_days)
        })
    }

    pub async fn preview(&self, backup_item_id: &str) -> Result<BackupContent, OrchestratorError> {
        Ok(self.engine.get_backup_content(backup_item_id).await?)
    }

    pub async fn diff(&self, backup_item_id: &str) -> Result<DiffResult, OrchestratorError> {
        Ok(self.engine.get_diff(backup_item_id).await?)
    }

    pub async fn diff_has_changes(&self, backup_item_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self.diff(backup_item_id).await?.has_changes())
    }

    /// Restore one item. An engine failure is reported in the result;
    /// a missing item is an error.
    pub async fn restore_item(&mut self, backup_item_id: &str) -> Result<RestoreResult, OrchestratorError> {
        self.require_run()?;

        let result = match self.engine.restore_item(backup_item_id).await {
            Ok(result) => result,
            Err(EngineError::NotFound(message)) => return Err(OrchestratorError::NotFound(message)),
            Err(e) => RestoreResult {
                backup_item_id: backup_item_id.to_string(),
                full_name: None,
                success: false,
                error_message: Some(OrchestratorError::from(e).user_message()),
            },
        };

        if result.success {
            info!("Restored backup item {}", backup_item_id);
            self.events.notify(NoticeLevel::Success, "Restore Complete", "Item restored");
        } else {
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "Restore failed".to_string());
            warn!("Restore of backup item {} failed: {}", backup_item_id, message);
            self.events.notify(NoticeLevel::Error, "Restore Failed", message);
        }

        self.reload().await;
        Ok(result)
    }

    /// Restore every item of the run. Partial success is reported, not raised.
    pub async fn restore_all(&mut self) -> Result<RestoreReport, OrchestratorError> {
        let run_id = self.require_run()?;
        let results = self.engine.restore_all(&run_id).await?;
        let report = RestoreReport::from_results(results);

        info!(
            "Restore of run {}: {} restored, {} failed",
            run_id, report.success_count, report.fail_count
        );
        let level = if report.fail_count > 0 {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Success
        };
        self.events.notify(level, "Restore Complete", report.message());

        self.reload().await;
        Ok(report)
    }

    /// Irreversibly delete the backup set
    pub async fn cleanup(&mut self) -> Result<(), OrchestratorError> {
        let run_id = self.require_run()?;
        self.engine.cleanup_backup(&run_id).await?;

        self.summary = None;
        self.items.clear();
        info!("Backup for run {} cleared", run_id);

        self.events.publish(Event::BackupCleared {
            run_id,
            timestamp: Utc::now(),
        });
        self.events.notify(NoticeLevel::Success, "Backup Cleared", "Backup data has been deleted");
        Ok(())
    }

    /// Snapshot the run's artifacts when the deploy did not request a backup
    pub async fn create_backup(&mut self) -> Result<BackupSummary, OrchestratorError> {
        let run_id = self.require_run()?;
        let summary = self.engine.create_backup_for_deployment(&run_id).await?;
        let summary = self.normalize(summary);
        info!("Created backup for run {}", run_id);

        self.events.notify(NoticeLevel::Success, "Backup Created", "Backup created for this deployment");
        self.reload().await;
        Ok(summary)
    }
}
