//! Session database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::BTreeSet;
use tracing::debug;

use crate::domain::{Session, WorkflowStep};
use crate::engine::{SessionStore, StoreError};

/// Row type for sessions table
#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub owner: String,
    pub workflow_step: i64,
    pub completed_steps: String,
    pub current_scan_id: Option<String>,
    pub current_change_plan_id: Option<String>,
    pub current_deployment_run_id: Option<String>,
    pub has_backup: i32,
    pub updated_at: String,
}

fn parse_step(value: i64) -> Result<WorkflowStep, StoreError> {
    u8::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("workflow step {}", value)))
        .and_then(|v| WorkflowStep::try_from(v).map_err(StoreError::Corrupt))
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SessionRow {
    pub fn to_session(&self) -> Result<Session, StoreError> {
        let completed_steps: BTreeSet<WorkflowStep> = serde_json::from_str(&self.completed_steps)
            .map_err(|e| StoreError::Corrupt(format!("completed steps: {}", e)))?;

        Ok(Session {
            owner: self.owner.clone(),
            workflow_step: parse_step(self.workflow_step)?,
            completed_steps,
            current_scan_id: self.current_scan_id.clone(),
            current_change_plan_id: self.current_change_plan_id.clone(),
            current_deployment_run_id: self.current_deployment_run_id.clone(),
            has_backup: self.has_backup != 0,
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

/// Row type for session_history table
#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    owner: String,
    action: String,
    workflow_step: i64,
    current_scan_id: Option<String>,
    current_change_plan_id: Option<String>,
    current_deployment_run_id: Option<String>,
    has_backup: i32,
    recorded_at: String,
}

/// One committed session write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistoryEntry {
    pub id: i64,
    pub owner: String,
    pub action: String,
    pub workflow_step: WorkflowStep,
    pub current_scan_id: Option<String>,
    pub current_change_plan_id: Option<String>,
    pub current_deployment_run_id: Option<String>,
    pub has_backup: bool,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRow {
    fn to_entry(&self) -> Result<SessionHistoryEntry, StoreError> {
        Ok(SessionHistoryEntry {
            id: self.id,
            owner: self.owner.clone(),
            action: self.action.clone(),
            workflow_step: parse_step(self.workflow_step)?,
            current_scan_id: self.current_scan_id.clone(),
            current_change_plan_id: self.current_change_plan_id.clone(),
            current_deployment_run_id: self.current_deployment_run_id.clone(),
            has_backup: self.has_backup != 0,
            recorded_at: parse_timestamp(&self.recorded_at),
        })
    }
}

/// History rows kept per owner unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: i64 = 500;

/// SQLite-backed session store
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    history_limit: i64,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Keep at most `limit` history rows per owner
    pub fn with_history_limit(mut self, limit: i64) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Most recent committed writes for an owner, newest first
    pub async fn list_history(&self, owner: &str, limit: i64) -> Result<Vec<SessionHistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM session_history WHERE owner = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(HistoryRow::to_entry).collect()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_current_session(&self, owner: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE owner = ?")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.to_session()).transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let completed = serde_json::to_string(&session.completed_steps)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let step = i64::from(session.workflow_step.number());
        let updated_at = session.updated_at.to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                owner, workflow_step, completed_steps, current_scan_id,
                current_change_plan_id, current_deployment_run_id, has_backup, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner) DO UPDATE SET
                workflow_step = excluded.workflow_step,
                completed_steps = excluded.completed_steps,
                current_scan_id = excluded.current_scan_id,
                current_change_plan_id = excluded.current_change_plan_id,
                current_deployment_run_id = excluded.current_deployment_run_id,
                has_backup = excluded.has_backup,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.owner)
        .bind(step)
        .bind(&completed)
        .bind(&session.current_scan_id)
        .bind(&session.current_change_plan_id)
        .bind(&session.current_deployment_run_id)
        .bind(session.has_backup as i32)
        .bind(&updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO session_history (
                owner, action, workflow_step, current_scan_id,
                current_change_plan_id, current_deployment_run_id, has_backup, recorded_at
            )
            VALUES (?, 'save', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.owner)
        .bind(step)
        .bind(&session.current_scan_id)
        .bind(&session.current_change_plan_id)
        .bind(&session.current_deployment_run_id)
        .bind(session.has_backup as i32)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        prune_history(&mut tx, &session.owner, self.history_limit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_session(&self, owner: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sessions WHERE owner = ?")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO session_history (owner, action, workflow_step, has_backup, recorded_at)
            VALUES (?, 'clear', 0, 0, ?)
            "#,
        )
        .bind(owner)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        prune_history(&mut tx, owner, self.history_limit).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Drop all but the newest `keep` history rows of an owner
async fn prune_history(
    tx: &mut Transaction<'_, Sqlite>,
    owner: &str,
    keep: i64,
) -> Result<(), StoreError> {
    let pruned = sqlx::query(
        r#"
        DELETE FROM session_history
        WHERE owner = ?
          AND id NOT IN (
              SELECT id FROM session_history WHERE owner = ? ORDER BY id DESC LIMIT ?
          )
        "#,
    )
    .bind(owner)
    .bind(owner)
    .bind(keep)
    .execute(&mut **tx)
    .await?;

    if pruned.rows_affected() > 0 {
        debug!("Pruned {} history rows for {}", pruned.rows_affected(), owner);
    }
    Ok(())
}
