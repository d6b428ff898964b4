//! Configuration module for versionsweep
//!
//! Layers, lowest first: built-in defaults, `<config_dir>/versionsweep/config.toml`,
//! then `VERSIONSWEEP__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::{IncrementPolicy, NamespacePolicy, TestPolicy, DEFAULT_ARTIFACT_TYPES};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub plan: PlanConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Defaults offered for new scans and plans
    #[serde(default)]
    pub defaults: WorkflowDefaults,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to SQLite database
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn get_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            PathBuf::from(path)
        } else {
            get_data_dir().join("sessions.db")
        }
    }
}

/// Remote engine connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; falls back to VERSIONSWEEP_TOKEN
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Scan monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between scan status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Number of scans listed as recent
    #[serde(default = "default_recent_limit")]
    pub recent_scans_limit: u32,
}

fn default_poll_interval() -> u64 {
    3000
}

fn default_recent_limit() -> u32 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            recent_scans_limit: default_recent_limit(),
        }
    }
}

/// Change plan engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Upper bound on a single validation call
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// Item errors quoted in an aggregated failure message
    #[serde(default = "default_failure_detail_items")]
    pub failure_detail_items: usize,
}

fn default_validation_timeout() -> u64 {
    300
}

fn default_failure_detail_items() -> usize {
    3
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: default_validation_timeout(),
            failure_detail_items: default_failure_detail_items(),
        }
    }
}

/// Backup retention and expiration thresholds, in days
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    #[serde(default = "default_urgent_days")]
    pub urgent_days: i64,

    #[serde(default = "default_warning_days")]
    pub warning_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

fn default_urgent_days() -> i64 {
    7
}

fn default_warning_days() -> i64 {
    30
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            urgent_days: default_urgent_days(),
            warning_days: default_warning_days(),
        }
    }
}

/// Session ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Session history rows kept per owner
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
}

fn default_history_limit() -> i64 {
    500
}

fn default_owner() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "default".to_string())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            history_limit: default_history_limit(),
        }
    }
}

/// Defaults for new scans and plans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    #[serde(default = "default_types")]
    pub types: Vec<String>,

    #[serde(default)]
    pub namespace_policy: NamespacePolicy,

    #[serde(default = "default_target_api_version")]
    pub target_api_version: f64,

    #[serde(default)]
    pub increment_policy: IncrementPolicy,

    #[serde(default = "default_max_delta")]
    pub max_delta_per_deploy: u32,

    #[serde(default = "default_true")]
    pub validate_only: bool,

    #[serde(default)]
    pub test_policy: TestPolicy,
}

fn default_types() -> Vec<String> {
    DEFAULT_ARTIFACT_TYPES.iter().map(|t| t.to_string()).collect()
}

fn default_target_api_version() -> f64 {
    65.0
}

fn default_max_delta() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            types: default_types(),
            namespace_policy: NamespacePolicy::default(),
            target_api_version: default_target_api_version(),
            increment_policy: IncrementPolicy::default(),
            max_delta_per_deploy: default_max_delta(),
            validate_only: true,
            test_policy: TestPolicy::default(),
        }
    }
}

/// Get the data directory for versionsweep
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("versionsweep"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".versionsweep")))
        .unwrap_or_else(|| PathBuf::from(".versionsweep"))
}

/// Get the config directory for versionsweep
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("versionsweep"))
        .unwrap_or_else(get_data_dir)
}

pub fn default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Load configuration, layering the file and environment over defaults
pub fn load_config(path: Option<&Path>) -> Result<Config, ::config::ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    ::config::Config::builder()
        .add_source(::config::Config::try_from(&Config::default())?)
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix("VERSIONSWEEP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<PathBuf> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, contents)?;

    Ok(path)
}
