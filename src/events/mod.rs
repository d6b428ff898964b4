//! Event bus for signals visible to collaborators and presentation surfaces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{PlanStatus, ScanStatus, WorkflowStep};

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Event types that can be published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// User-facing outcome of an action
    Notice {
        level: NoticeLevel,
        title: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Workflow step changed
    StepChanged {
        from: WorkflowStep,
        to: WorkflowStep,
        timestamp: DateTime<Utc>,
    },

    /// Scan status observed by the monitor
    ScanStatusChanged {
        scan_id: String,
        status: ScanStatus,
        progress_percent: u32,
        timestamp: DateTime<Utc>,
    },

    /// Findings loaded for a completed scan
    FindingsLoaded {
        scan_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Change plan created or selected
    PlanSelected {
        plan_id: String,
        status: PlanStatus,
        eligible_items: u32,
        timestamp: DateTime<Utc>,
    },

    /// Deployment run queued
    DeploymentStarted {
        plan_id: String,
        run_id: String,
        backup_enabled: bool,
        timestamp: DateTime<Utc>,
    },

    /// Validation or deployment failed
    DeploymentFailed {
        plan_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Backup set deleted
    BackupCleared {
        run_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Session reset to not started
    SessionCleared {
        owner: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn notice(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Notice {
            level,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the scan ID associated with this event
    pub fn scan_id(&self) -> Option<&str> {
        match self {
            Event::ScanStatusChanged { scan_id, .. } | Event::FindingsLoaded { scan_id, .. } => Some(scan_id),
            _ => None,
        }
    }

    /// Get the plan ID associated with this event
    pub fn plan_id(&self) -> Option<&str> {
        match self {
            Event::PlanSelected { plan_id, .. }
            | Event::DeploymentStarted { plan_id, .. }
            | Event::DeploymentFailed { plan_id, .. } => Some(plan_id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Notice { timestamp, .. }
            | Event::StepChanged { timestamp, .. }
            | Event::ScanStatusChanged { timestamp, .. }
            | Event::FindingsLoaded { timestamp, .. }
            | Event::PlanSelected { timestamp, .. }
            | Event::DeploymentStarted { timestamp, .. }
            | Event::DeploymentFailed { timestamp, .. }
            | Event::BackupCleared { timestamp, .. }
            | Event::SessionCleared { timestamp, .. } => *timestamp,
        }
    }
}

/// Event bus for pub/sub communication
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        // Ignore errors if there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) {
        self.publish(Event::notice(level, title, message));
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
