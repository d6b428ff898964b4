//! HTTP+JSON client for the remote remediation engines

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

use super::{BackupEngine, DeployEngine, EngineError, PlanEngine, ScanEngine};
use crate::config::EngineConfig;
use crate::domain::{
    BackupContent, BackupItem, BackupSummary, ChangeItem, ChangePlan, ComplianceMetrics,
    CreatePlanRequest, DeploymentRun, DiffResult, ExecuteRequest, Finding, FindingsSummary,
    InventoryCounts, NamespacePolicy, RestoreResult, Scan, ScanRequest, ValidationResult,
    VersionDistribution,
};

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody<'a> {
    item_ids: &'a [String],
}

/// Engine client speaking JSON over HTTP.
///
/// Implements all four engine traits against one base URL.
#[derive(Clone)]
pub struct HttpEngineClient {
    client: Client,
    token: Option<String>,
    base_url: String,
}

impl HttpEngineClient {
    /// Create a new client
    ///
    /// Reads the token from VERSIONSWEEP_TOKEN if not provided
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, EngineError> {
        let token = token.or_else(|| env::var("VERSIONSWEEP_TOKEN").ok());
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("versionsweep/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            config.base_url.clone(),
            config.token.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn build_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let mut req = self.client.request(method, url).header("Accept", "application/json");

        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        req
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        debug!("GET {}", path);
        let response = self.build_request(Method::GET, path).send().await?;
        self.handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, EngineError> {
        debug!("POST {}", path);
        let response = self.build_request(Method::POST, path).json(body).send().await?;
        self.handle_response(response).await
    }

    /// Send a request whose response body is ignored
    async fn send_empty(&self, method: Method, path: &str) -> Result<(), EngineError> {
        debug!("{} {}", method, path);
        let response = self.build_request(method, path).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::error_for(status, response).await)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, EngineError> {
        let status = response.status();

        if !status.is_success() {
            return Err(Self::error_for(status, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))
    }

    async fn error_for(status: StatusCode, response: reqwest::Response) -> EngineError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return EngineError::AuthRequired;
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = extract_message(&error_text);

        if status == StatusCode::NOT_FOUND {
            return EngineError::NotFound(if message.is_empty() {
                "Resource not found".to_string()
            } else {
                message
            });
        }

        EngineError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pull `message` out of a JSON error body, falling back to the raw text
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Treat a 404 as an absent resource
fn optional<T>(result: Result<T, EngineError>) -> Result<Option<T>, EngineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EngineError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ScanEngine for HttpEngineClient {
    async fn start_scan(&self, request: &ScanRequest) -> Result<String, EngineError> {
        let created: IdResponse = self.post("/scans", request).await?;
        Ok(created.id)
    }

    async fn get_scan_status(&self, scan_id: &str) -> Result<Option<Scan>, EngineError> {
        optional(self.get(&format!("/scans/{}", scan_id)).await)
    }

    async fn cancel_scan(&self, scan_id: &str) -> Result<(), EngineError> {
        self.send_empty(Method::POST, &format!("/scans/{}/cancel", scan_id)).await
    }

    async fn get_findings_by_scan(&self, scan_id: &str) -> Result<Vec<Finding>, EngineError> {
        self.get(&format!("/scans/{}/findings", scan_id)).await
    }

    async fn get_findings_summary(&self, scan_id: &str) -> Result<FindingsSummary, EngineError> {
        self.get(&format!("/scans/{}/findings/summary", scan_id)).await
    }

    async fn get_recent_scans(&self, limit: u32) -> Result<Vec<Scan>, EngineError> {
        self.get(&format!("/scans?limit={}", limit)).await
    }

    async fn get_inventory_counts(&self) -> Result<InventoryCounts, EngineError> {
        self.get("/inventory/counts").await
    }

    async fn get_version_distribution(&self, artifact_type: &str) -> Result<VersionDistribution, EngineError> {
        let counts = self
            .get(&format!("/inventory/distribution?artifactType={}", artifact_type))
            .await?;
        Ok(VersionDistribution::new(artifact_type, counts))
    }

    async fn get_compliance_metrics(
        &self,
        target_api_version: f64,
        scope: NamespacePolicy,
    ) -> Result<ComplianceMetrics, EngineError> {
        self.get(&format!(
            "/inventory/compliance?targetApiVersion={}&scopePolicy={}",
            target_api_version, scope
        ))
        .await
    }
}

#[async_trait]
impl PlanEngine for HttpEngineClient {
    async fn create_change_plan(&self, request: &CreatePlanRequest) -> Result<String, EngineError> {
        let created: IdResponse = self.post("/plans", request).await?;
        Ok(created.id)
    }

    async fn get_change_plan(&self, plan_id: &str) -> Result<ChangePlan, EngineError> {
        self.get(&format!("/plans/{}", plan_id)).await
    }

    async fn get_change_items(&self, plan_id: &str) -> Result<Vec<ChangeItem>, EngineError> {
        self.get(&format!("/plans/{}/items", plan_id)).await
    }

    async fn reset_plan_for_retry(&self, plan_id: &str) -> Result<(), EngineError> {
        self.send_empty(Method::POST, &format!("/plans/{}/reset", plan_id)).await
    }

    async fn get_deployment_errors_for_plan(&self, plan_id: &str) -> Result<Vec<ChangeItem>, EngineError> {
        self.get(&format!("/plans/{}/errors", plan_id)).await
    }

    async fn get_deployment_run_details(&self, run_id: &str) -> Result<DeploymentRun, EngineError> {
        self.get(&format!("/runs/{}", run_id)).await
    }

    async fn get_plan_history(&self, limit: u32) -> Result<Vec<ChangePlan>, EngineError> {
        self.get(&format!("/plans?limit={}", limit)).await
    }
}

#[async_trait]
impl DeployEngine for HttpEngineClient {
    async fn validate(&self, plan_id: &str, item_ids: &[String]) -> Result<ValidationResult, EngineError> {
        self.post(&format!("/plans/{}/validate", plan_id), &ValidateBody { item_ids })
            .await
    }

    async fn execute_plan_with_backup(&self, request: &ExecuteRequest) -> Result<String, EngineError> {
        let created: IdResponse = self
            .post(&format!("/plans/{}/execute", request.plan_id), request)
            .await?;
        Ok(created.id)
    }
}

#[async_trait]
impl BackupEngine for HttpEngineClient {
    async fn get_backup_summary(&self, run_id: &str) -> Result<BackupSummary, EngineError> {
        self.get(&format!("/runs/{}/backup", run_id)).await
    }

    async fn get_backup_items(&self, run_id: &str) -> Result<Vec<BackupItem>, EngineError> {
        self.get(&format!("/runs/{}/backup/items", run_id)).await
    }

    async fn get_backup_content(&self, backup_item_id: &str) -> Result<BackupContent, EngineError> {
        self.get(&format!("/backups/{}/content", backup_item_id)).await
    }

    async fn get_diff(&self, backup_item_id: &str) -> Result<DiffResult, EngineError> {
        self.get(&format!("/backups/{}/diff", backup_item_id)).await
    }

    async fn restore_item(&self, backup_item_id: &str) -> Result<RestoreResult, EngineError> {
        self.post(&format!("/backups/{}/restore", backup_item_id), &serde_json::json!({}))
            .await
    }

    async fn restore_all(&self, run_id: &str) -> Result<Vec<RestoreResult>, EngineError> {
        self.post(&format!("/runs/{}/backup/restore", run_id), &serde_json::json!({}))
            .await
    }

    async fn cleanup_backup(&self, run_id: &str) -> Result<(), EngineError> {
        self.send_empty(Method::DELETE, &format!("/runs/{}/backup", run_id)).await
    }

    async fn create_backup_for_deployment(&self, run_id: &str) -> Result<BackupSummary, EngineError> {
        self.post(&format!("/runs/{}/backup", run_id), &serde_json::json!({}))
            .await
    }
}
