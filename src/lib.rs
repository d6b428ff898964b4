//! Versionsweep - workflow orchestration for bulk API-version remediation

pub mod backup;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod events;
pub mod findings;
pub mod inventory;
pub mod monitor;
pub mod plan;
pub mod session;
pub mod state_machine;
