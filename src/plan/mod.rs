//! Change plan engine: selection, the validate-then-deploy protocol and
//! failure detail aggregation

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{
    ChangeItem, ChangePlan, CreatePlanRequest, DeploymentRun, EligibilityFilter, ExecuteRequest,
    ExecutionTally, OrchestratorError, PlanEffect, PlanStatus, PlanTrigger, ValidationResult,
    ValidationStatus,
};
use crate::engine::{DeployEngine, EngineError, PlanEngine};
use crate::state_machine::{PlanContext, PlanStateMachine, TransitionError};

/// Shown when neither the run nor its items carry any error text
pub const DEPLOYMENT_FAILED: &str = "Deployment failed";

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        OrchestratorError::InvalidTransition(err.to_string())
    }
}

/// Drives one change plan from Draft to Deployed
pub struct ChangePlanner {
    plan_engine: Arc<dyn PlanEngine>,
    deploy_engine: Arc<dyn DeployEngine>,
    machine: PlanStateMachine,
    validation_timeout: Duration,
    failure_detail_items: usize,
    plan: Option<ChangePlan>,
    items: Vec<ChangeItem>,
    selected: BTreeSet<String>,
    validation_complete: bool,
    validation: Option<ValidationResult>,
    run: Option<DeploymentRun>,
    failure_detail: Option<String>,
    history: Vec<ChangePlan>,
}

impl ChangePlanner {
    pub fn new(
        plan_engine: Arc<dyn PlanEngine>,
        deploy_engine: Arc<dyn DeployEngine>,
        validation_timeout: Duration,
        failure_detail_items: usize,
    ) -> Self {
        Self {
            plan_engine,
            deploy_engine,
            machine: PlanStateMachine::new(),
            validation_timeout,
            failure_detail_items,
            plan: None,
            items: Vec::new(),
            selected: BTreeSet::new(),
            validation_complete: false,
            validation: None,
            run: None,
            failure_detail: None,
            history: Vec::new(),
        }
    }

    pub fn plan(&self) -> Option<&ChangePlan> {
        self.plan.as_ref()
    }

    pub fn status(&self) -> Option<PlanStatus> {
        self.plan.as_ref().map(|p| p.status)
    }

    /// Items in unit order
    pub fn items(&self) -> &[ChangeItem] {
        &self.items
    }

    pub fn run(&self) -> Option<&DeploymentRun> {
        self.run.as_ref()
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn is_validation_complete(&self) -> bool {
        self.validation_complete
    }

    pub fn failure_detail(&self) -> Option<&str> {
        self.failure_detail.as_deref()
    }

    pub fn history(&self) -> &[ChangePlan] {
        &self.history
    }

    /// Create a plan from a scan and load it
    pub async fn create_plan(&mut self, request: &CreatePlanRequest) -> Result<ChangePlan, OrchestratorError> {
        if request.scan_id.trim().is_empty() {
            return Err(OrchestratorError::not_found("No scan selected for the change plan"));
        }

        let plan_id = self.plan_engine.create_change_plan(request).await?;
        let plan = self.load_plan(&plan_id).await?;
        info!(
            "Created plan {} with {} items ({} eligible)",
            plan.id,
            self.items.len(),
            plan.eligible_items
        );
        Ok(plan)
    }

    /// Load a plan and its items, dropping all local selection state
    pub async fn load_plan(&mut self, plan_id: &str) -> Result<ChangePlan, OrchestratorError> {
        let (plan, items) = futures::try_join!(
            self.plan_engine.get_change_plan(plan_id),
            self.plan_engine.get_change_items(plan_id),
        )?;

        self.plan = Some(plan.clone());
        self.set_items(items);
        self.selected.clear();
        self.validation_complete = false;
        self.validation = None;
        self.run = None;
        self.failure_detail = None;

        if plan.status == PlanStatus::Failed {
            self.load_failure_detail(None).await;
        }

        Ok(plan)
    }

    /// Re-read the plan and items, adopting the engine's status. A local
    /// validation survives as long as the engine still reports Draft or Ready.
    pub async fn refresh(&mut self) -> Result<(), OrchestratorError> {
        let plan_id = self.require_plan()?.id.clone();
        let (plan, items) = futures::try_join!(
            self.plan_engine.get_change_plan(&plan_id),
            self.plan_engine.get_change_items(&plan_id),
        )?;

        if let Some(run) = self.run.as_mut() {
            match self.plan_engine.get_deployment_run_details(&run.id).await {
                Ok(mut latest) => {
                    if latest.item_ids.is_empty() {
                        latest.item_ids = std::mem::take(&mut run.item_ids);
                    }
                    latest.tally_from(&items);
                    *run = latest;
                }
                Err(e) => warn!("Failed to refresh deployment run {}: {}", run.id, e),
            }
        }

        let mut plan = plan;
        let reported = plan.status;
        match reported {
            // Validation lives in this process only; the engine still reports the plan as unvalidated
            s if s.accepts_validation() && self.validation_complete => plan.status = PlanStatus::Validated,
            PlanStatus::Validated => {}
            PlanStatus::Cancelled if self.status() != Some(PlanStatus::Cancelled) => {
                if let Err(e) = self.fire(PlanTrigger::Cancel) {
                    warn!("Plan {} was cancelled remotely: {}", plan.id, e);
                }
                self.validation_complete = false;
            }
            _ => self.validation_complete = false,
        }

        if self.status() != Some(plan.status) {
            debug!("Plan {} is now {}", plan.id, plan.status);
        }
        if plan.status != PlanStatus::Failed {
            self.failure_detail = None;
        }
        let failed = plan.status == PlanStatus::Failed;
        self.plan = Some(plan);
        self.set_items(items);
        let retained = self
            .selected
            .iter()
            .filter(|id| self.items.iter().any(|i| &i.id == *id && i.is_eligible()))
            .cloned()
            .collect();
        self.replace_selection(retained);

        if failed {
            self.load_failure_detail(None).await;
        }
        Ok(())
    }

    /// Point the planner at an existing deployment run
    pub async fn attach_run(&mut self, run_id: &str) -> Result<&DeploymentRun, OrchestratorError> {
        let mut run = self.plan_engine.get_deployment_run_details(run_id).await?;
        run.tally_from(&self.items);
        Ok(self.run.insert(run))
    }

    pub async fn refresh_history(&mut self, limit: u32) -> Result<&[ChangePlan], OrchestratorError> {
        self.history = self.plan_engine.get_plan_history(limit).await?;
        Ok(&self.history)
    }

    fn set_items(&mut self, mut items: Vec<ChangeItem>) {
        items.sort_by_key(|i| i.unit_number);
        self.items = items;
    }

    fn require_plan(&self) -> Result<&ChangePlan, OrchestratorError> {
        self.plan
            .as_ref()
            .ok_or_else(|| OrchestratorError::not_found("No change plan selected"))
    }

    // -- Selection --

    /// Replace the selection. Unknown and Blocked ids are ignored.
    /// Returns the number of eligible items now selected.
    pub fn select_items<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selection: BTreeSet<String> = ids
            .into_iter()
            .filter_map(|id| {
                let id = id.as_ref();
                self.items
                    .iter()
                    .find(|i| i.id == id && i.is_eligible())
                    .map(|i| i.id.clone())
            })
            .collect();
        self.replace_selection(selection);
        self.selected.len()
    }

    pub fn select_all_eligible(&mut self) -> usize {
        let selection = self
            .items
            .iter()
            .filter(|i| i.is_eligible())
            .map(|i| i.id.clone())
            .collect();
        self.replace_selection(selection);
        self.selected.len()
    }

    pub fn select_none(&mut self) {
        self.replace_selection(BTreeSet::new());
    }

    fn replace_selection(&mut self, selection: BTreeSet<String>) {
        if selection == self.selected {
            return;
        }
        self.selected = selection;

        let was_validated = self.validation_complete || self.validation.is_some();
        self.validation_complete = false;
        self.validation = None;
        if self.status() == Some(PlanStatus::Validated) {
            if let Err(e) = self.fire(PlanTrigger::SelectionChanged) {
                warn!("Selection change could not reset plan status: {}", e);
            }
        }
        if was_validated {
            debug!("Selection changed; validation must be repeated");
        }
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn is_selected(&self, item_id: &str) -> bool {
        self.selected.contains(item_id)
    }

    pub fn eligible_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_eligible()).count()
    }

    pub fn blocked_count(&self) -> usize {
        self.items.len() - self.eligible_count()
    }

    /// Selected items in unit order
    pub fn selected_items(&self) -> impl Iterator<Item = &ChangeItem> {
        self.items.iter().filter(move |i| self.selected.contains(&i.id))
    }

    pub fn filtered_items(&self, filter: EligibilityFilter) -> impl Iterator<Item = &ChangeItem> {
        self.items.iter().filter(move |i| filter.matches(i))
    }

    pub fn execution_tally(&self) -> ExecutionTally {
        ExecutionTally::from_items(&self.items)
    }

    // -- Gates --

    pub fn context(&self) -> Option<PlanContext> {
        self.plan.as_ref().map(|p| {
            PlanContext::new(p.status)
                .with_selection(self.selected.len())
                .with_validation(self.validation_complete)
        })
    }

    pub fn can_validate(&self) -> bool {
        self.context().map(|c| c.can_validate()).unwrap_or(false)
    }

    pub fn can_deploy(&self) -> bool {
        self.context().map(|c| c.can_deploy()).unwrap_or(false)
    }

    /// Run a transition and apply its synchronous effects. Returns whether a
    /// failure detail load is due.
    fn fire(&mut self, trigger: PlanTrigger) -> Result<bool, OrchestratorError> {
        let mut ctx = self
            .context()
            .ok_or_else(|| OrchestratorError::not_found("No change plan selected"))?;
        let from = ctx.status;
        let (to, effects) = self.machine.transition(&mut ctx, trigger)?;

        if let Some(plan) = self.plan.as_mut() {
            plan.status = to;
        }
        info!("Plan status {} -> {} ({})", from, to, trigger);

        let mut load_detail = false;
        for effect in effects {
            match effect {
                PlanEffect::ResetValidation => {
                    self.validation_complete = false;
                }
                PlanEffect::ClearFailureDetail => {
                    self.failure_detail = None;
                    self.validation = None;
                    for item in &mut self.items {
                        item.error_details = None;
                        item.validation_status = ValidationStatus::NotValidated;
                    }
                }
                PlanEffect::LoadFailureDetail => load_detail = true,
            }
        }
        Ok(load_detail)
    }

    // -- Validate / deploy --

    /// Verify the selected eligible items with the deploy engine.
    ///
    /// Completing with per-item errors still counts as a finished
    /// validation; a failed call moves the plan to Failed.
    pub async fn validate_selected(&mut self) -> Result<ValidationResult, OrchestratorError> {
        let ctx = self
            .context()
            .ok_or_else(|| OrchestratorError::not_found("No change plan selected"))?;
        if !ctx.status.accepts_validation() {
            return Err(OrchestratorError::validation(format!(
                "A {} plan cannot be validated",
                ctx.status
            )));
        }
        if !ctx.can_validate() {
            return Err(OrchestratorError::validation(
                "Select at least one eligible item to validate",
            ));
        }

        let plan_id = self.require_plan()?.id.clone();
        let ids = self.selected_ids();
        info!("Validating {} items of plan {}", ids.len(), plan_id);

        let outcome = match tokio::time::timeout(
            self.validation_timeout,
            self.deploy_engine.validate(&plan_id, &ids),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.validation_timeout.as_secs())),
        };

        match outcome {
            Ok(result) => {
                self.apply_validation(&result);
                self.fire(PlanTrigger::ValidationPassed)?;
                self.validation_complete = true;
                self.validation = Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                warn!("Validation of plan {} failed: {}", plan_id, e);
                let message = e.engine_message().map(str::to_string);
                if self.fire(PlanTrigger::ValidationFailed)? {
                    self.load_failure_detail(message.as_deref()).await;
                }
                Err(e.into())
            }
        }
    }

    fn apply_validation(&mut self, result: &ValidationResult) {
        for item in &mut self.items {
            if let Some(error) = result.errors.iter().find(|e| e.item_id == item.id) {
                item.validation_status = ValidationStatus::Failed;
                item.error_details = Some(error.message.clone());
            } else if result.validated_ids.contains(&item.id) {
                item.validation_status = ValidationStatus::Passed;
            }
        }
    }

    /// Execute the validated selection and record the deployment run
    pub async fn deploy(&mut self, create_backup: bool) -> Result<DeploymentRun, OrchestratorError> {
        let ids = self.selected_ids();
        if create_backup && ids.is_empty() {
            return Err(OrchestratorError::validation(
                "Select at least one item to back up and deploy",
            ));
        }

        let ctx = self
            .context()
            .ok_or_else(|| OrchestratorError::not_found("No change plan selected"))?;
        if !ctx.can_deploy() {
            return Err(OrchestratorError::validation(
                "Validate the selected eligible items before deploying",
            ));
        }
        self.machine.can_transition(&ctx, PlanTrigger::StartDeploy)?;

        let plan_id = self.require_plan()?.id.clone();
        self.fire(PlanTrigger::StartDeploy)?;

        let request = ExecuteRequest {
            plan_id: plan_id.clone(),
            item_ids: ids.clone(),
            create_backup,
        };

        match self.deploy_engine.execute_plan_with_backup(&request).await {
            Ok(run_id) => {
                info!(
                    "Deployment run {} queued for plan {} ({} items, backup: {})",
                    run_id,
                    plan_id,
                    ids.len(),
                    create_backup
                );
                self.run = Some(DeploymentRun::queued(run_id, plan_id, ids, create_backup));
                self.fire(PlanTrigger::ExecutionStarted)?;
                if let Err(e) = self.refresh().await {
                    warn!("Failed to refresh plan after deploy: {}", e);
                }
                self.run
                    .clone()
                    .ok_or_else(|| OrchestratorError::RemoteExecution(DEPLOYMENT_FAILED.to_string()))
            }
            Err(e) => {
                warn!("Deployment of plan {} failed: {}", plan_id, e);
                let message = e.engine_message().map(str::to_string);
                if self.fire(PlanTrigger::DeployFailed)? {
                    self.load_failure_detail(message.as_deref()).await;
                }
                Err(e.into())
            }
        }
    }

    /// Move a failed plan back to Draft. Eligibility is untouched.
    pub async fn reset_for_retry(&mut self) -> Result<(), OrchestratorError> {
        let ctx = self
            .context()
            .ok_or_else(|| OrchestratorError::not_found("No change plan selected"))?;
        self.machine.can_transition(&ctx, PlanTrigger::ResetForRetry)?;

        let plan_id = self.require_plan()?.id.clone();
        self.plan_engine.reset_plan_for_retry(&plan_id).await?;
        self.fire(PlanTrigger::ResetForRetry)?;
        self.run = None;
        info!("Plan {} reset for retry", plan_id);

        match self.plan_engine.get_change_items(&plan_id).await {
            Ok(items) => self.set_items(items),
            Err(e) => warn!("Failed to reload items after reset: {}", e),
        }
        Ok(())
    }

    /// Fetch the best available failure text. Only runs while the plan is
    /// Failed and nothing is cached yet.
    pub async fn load_failure_detail(&mut self, engine_message: Option<&str>) -> Option<&str> {
        let plan_id = match self.plan.as_ref() {
            Some(plan) if plan.status == PlanStatus::Failed => plan.id.clone(),
            _ => return self.failure_detail.as_deref(),
        };
        if self.failure_detail.is_some() {
            return self.failure_detail.as_deref();
        }

        let mut detail = None;

        if let Some(run_id) = self.run.as_ref().map(|r| r.id.clone()) {
            match self.plan_engine.get_deployment_run_details(&run_id).await {
                Ok(run) => {
                    detail = run
                        .error_message
                        .as_deref()
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(str::to_string);
                }
                Err(e) => warn!("Failed to load deployment run {}: {}", run_id, e),
            }
        }

        if detail.is_none() {
            match self.plan_engine.get_deployment_errors_for_plan(&plan_id).await {
                Ok(items) => detail = summarize_item_errors(&items, self.failure_detail_items),
                Err(e) => warn!("Failed to load item errors for plan {}: {}", plan_id, e),
            }
        }

        let detail = detail
            .or_else(|| engine_message.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string))
            .unwrap_or_else(|| DEPLOYMENT_FAILED.to_string());

        Some(self.failure_detail.insert(detail).as_str())
    }

    pub fn clear(&mut self) {
        self.plan = None;
        self.items.clear();
        self.selected.clear();
        self.validation_complete = false;
        self.validation = None;
        self.run = None;
        self.failure_detail = None;
    }
}

/// "name: error" for the first `limit` items, with a "(+N more)" suffix
pub fn summarize_item_errors(items: &[ChangeItem], limit: usize) -> Option<String> {
    let errors: Vec<String> = items
        .iter()
        .filter_map(|item| {
            item.error_details
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| format!("{}: {}", item.full_name, e))
        })
        .collect();

    if errors.is_empty() {
        return None;
    }

    let mut summary = errors.iter().take(limit).cloned().collect::<Vec<_>>().join("; ");
    if errors.len() > limit {
        summary.push_str(&format!(" (+{} more)", errors.len() - limit));
    }
    Some(summary)
}
