//! Transition definitions for the change plan state machine

use crate::domain::{Guard, PlanEffect, PlanStatus, PlanTrigger};

/// Definition of a state transition
#[derive(Debug, Clone)]
pub struct TransitionDef {
    pub from: PlanStatus,
    pub to: PlanStatus,
    pub trigger: PlanTrigger,
    pub guards: Vec<Guard>,
    pub effects: Vec<PlanEffect>,
}

impl TransitionDef {
    pub fn new(from: PlanStatus, trigger: PlanTrigger, to: PlanStatus) -> Self {
        Self {
            from,
            to,
            trigger,
            guards: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn with_effect(mut self, effect: PlanEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: Vec<PlanEffect>) -> Self {
        self.effects = effects;
        self
    }
}

/// Statuses from which a plan may still be cancelled
const CANCELLABLE: [PlanStatus; 5] = [
    PlanStatus::Draft,
    PlanStatus::Ready,
    PlanStatus::Validated,
    PlanStatus::Deploying,
    PlanStatus::Executing,
];

/// Build all the transition definitions for a change plan
pub fn build_transitions() -> Vec<TransitionDef> {
    use Guard::*;
    use PlanEffect::*;
    use PlanStatus::*;
    use PlanTrigger::*;

    let mut transitions = vec![
        // Preparation
        TransitionDef::new(Draft, MarkReady, Ready),
        TransitionDef::new(Draft, ValidationPassed, Validated).with_guard(HasEligibleSelection),
        TransitionDef::new(Ready, ValidationPassed, Validated).with_guard(HasEligibleSelection),
        TransitionDef::new(Draft, ValidationFailed, PlanStatus::Failed)
            .with_effects(vec![ResetValidation, LoadFailureDetail]),
        TransitionDef::new(Ready, ValidationFailed, PlanStatus::Failed)
            .with_effects(vec![ResetValidation, LoadFailureDetail]),
        TransitionDef::new(Validated, SelectionChanged, Ready).with_effect(ResetValidation),
        // Deployment
        TransitionDef::new(Validated, StartDeploy, Deploying)
            .with_guard(ValidationComplete)
            .with_guard(HasEligibleSelection)
            .with_effect(ResetValidation),
        TransitionDef::new(Deploying, ExecutionStarted, Executing),
        TransitionDef::new(Deploying, DeploySucceeded, Deployed),
        TransitionDef::new(Executing, DeploySucceeded, Deployed),
        TransitionDef::new(Deploying, DeployFailed, PlanStatus::Failed).with_effect(LoadFailureDetail),
        TransitionDef::new(Executing, DeployFailed, PlanStatus::Failed).with_effect(LoadFailureDetail),
        // Recovery
        TransitionDef::new(PlanStatus::Failed, ResetForRetry, Draft)
            .with_effects(vec![ClearFailureDetail, ResetValidation]),
    ];

    transitions.extend(
        CANCELLABLE
            .iter()
            .map(|from| TransitionDef::new(*from, Cancel, Cancelled).with_effect(ResetValidation)),
    );

    transitions
}
