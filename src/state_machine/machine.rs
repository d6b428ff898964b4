//! Change plan state machine implementation

use std::collections::HashMap;

use crate::domain::{Guard, PlanEffect, PlanStatus, PlanTrigger};
use crate::state_machine::transitions::{build_transitions, TransitionDef};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} with trigger {trigger}")]
    InvalidTransition { from: PlanStatus, trigger: PlanTrigger },

    #[error("Guard condition failed: {guard:?}")]
    GuardFailed { guard: Guard },
}

/// What the machine needs to know about a plan to evaluate guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanContext {
    pub status: PlanStatus,
    pub eligible_selected: usize,
    pub validation_complete: bool,
}

impl PlanContext {
    pub fn new(status: PlanStatus) -> Self {
        Self {
            status,
            eligible_selected: 0,
            validation_complete: false,
        }
    }

    pub fn with_selection(mut self, eligible_selected: usize) -> Self {
        self.eligible_selected = eligible_selected;
        self
    }

    pub fn with_validation(mut self, validation_complete: bool) -> Self {
        self.validation_complete = validation_complete;
        self
    }

    /// `status ∈ {Draft, Ready}` with at least one eligible item selected
    pub fn can_validate(&self) -> bool {
        self.status.accepts_validation() && self.eligible_selected > 0
    }

    /// Validation finished for the current selection and it is non-empty
    pub fn can_deploy(&self) -> bool {
        self.validation_complete && self.eligible_selected > 0
    }
}

/// The plan state machine handles all change plan status transitions
pub struct PlanStateMachine {
    transitions: HashMap<(PlanStatus, PlanTrigger), TransitionDef>,
}

impl Default for PlanStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        for def in build_transitions() {
            transitions.insert((def.from, def.trigger), def);
        }

        Self { transitions }
    }

    fn lookup(&self, ctx: &PlanContext, trigger: PlanTrigger) -> Result<&TransitionDef, TransitionError> {
        let def = self
            .transitions
            .get(&(ctx.status, trigger))
            .ok_or(TransitionError::InvalidTransition {
                from: ctx.status,
                trigger,
            })?;

        if let Some(guard) = def.guards.iter().find(|g| !self.evaluate_guard(ctx, g)) {
            return Err(TransitionError::GuardFailed { guard: *guard });
        }

        Ok(def)
    }

    /// Check if a transition is valid (without executing it)
    pub fn can_transition(&self, ctx: &PlanContext, trigger: PlanTrigger) -> Result<(), TransitionError> {
        self.lookup(ctx, trigger).map(|_| ())
    }

    /// Execute a transition, returning the new status and the effects to apply
    pub fn transition(
        &self,
        ctx: &mut PlanContext,
        trigger: PlanTrigger,
    ) -> Result<(PlanStatus, Vec<PlanEffect>), TransitionError> {
        let def = self.lookup(ctx, trigger)?;
        let (to, effects) = (def.to, def.effects.clone());

        ctx.status = to;
        if effects.contains(&PlanEffect::ResetValidation) {
            ctx.validation_complete = false;
        }

        Ok((to, effects))
    }

    fn evaluate_guard(&self, ctx: &PlanContext, guard: &Guard) -> bool {
        match guard {
            Guard::HasEligibleSelection => ctx.eligible_selected > 0,
            Guard::ValidationComplete => ctx.validation_complete,
        }
    }
}
