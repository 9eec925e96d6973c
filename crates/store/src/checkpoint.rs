use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use procura_core::domain::procurement::{ProcurementId, ThreadId, WorkflowContext};
use procura_core::workflow::states::WorkflowStatus;

use crate::{DbPool, StoreError};

/// The full durable snapshot of one workflow run. Written after every node so
/// a crash resumes from the last completed step instead of the beginning.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointRecord {
    pub workflow_id: String,
    pub thread_id: ThreadId,
    pub procurement_id: ProcurementId,
    pub current_step: String,
    pub status: WorkflowStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub context: WorkflowContext,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StoreError>;
    async fn find_by_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<CheckpointRecord>, StoreError>;
    async fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<CheckpointRecord>, StoreError>;
    /// The most recently started workflow for a procurement; quote intake
    /// addresses workflows by procurement, not thread.
    async fn find_by_procurement(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Option<CheckpointRecord>, StoreError>;
    /// Every checkpoint whose status is not terminal, for the timeout sweep.
    async fn list_active(&self) -> Result<Vec<CheckpointRecord>, StoreError>;
}

pub struct SqlCheckpointRepository {
    pool: DbPool,
}

impl SqlCheckpointRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Decode(format!("bad {column} timestamp `{value}`: {err}")))
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointRecord, StoreError> {
    let workflow_id: String =
        row.try_get("workflow_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let thread_id: String =
        row.try_get("thread_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let procurement_id: String =
        row.try_get("procurement_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let current_step: String =
        row.try_get("current_step").map_err(|e| StoreError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| StoreError::Decode(e.to_string()))?;
    let retry_count: i64 =
        row.try_get("retry_count").map_err(|e| StoreError::Decode(e.to_string()))?;
    let error_message: Option<String> =
        row.try_get("error_message").map_err(|e| StoreError::Decode(e.to_string()))?;
    let context_json: String =
        row.try_get("context_json").map_err(|e| StoreError::Decode(e.to_string()))?;
    let started_at_str: String =
        row.try_get("started_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| StoreError::Decode(e.to_string()))?;

    let status = WorkflowStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Decode(format!("unknown workflow status `{status_str}`")))?;
    let context: WorkflowContext = serde_json::from_str(&context_json)
        .map_err(|err| StoreError::Decode(format!("bad checkpoint context: {err}")))?;

    Ok(CheckpointRecord {
        workflow_id,
        thread_id: ThreadId(thread_id),
        procurement_id: ProcurementId(procurement_id),
        current_step,
        status,
        retry_count: retry_count.max(0) as u32,
        error_message,
        context,
        started_at: parse_timestamp(&started_at_str, "started_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

const CHECKPOINT_COLUMNS: &str = "workflow_id, thread_id, procurement_id, current_step, status,
            retry_count, error_message, context_json, started_at, updated_at";

#[async_trait]
impl CheckpointRepository for SqlCheckpointRepository {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StoreError> {
        let context_json = serde_json::to_string(&record.context)
            .map_err(|err| StoreError::Decode(format!("unencodable context: {err}")))?;

        sqlx::query(
            "INSERT INTO workflow_checkpoint (workflow_id, thread_id, procurement_id,
                                              current_step, status, retry_count, error_message,
                                              context_json, started_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(workflow_id) DO UPDATE SET
                 current_step = excluded.current_step,
                 status = excluded.status,
                 retry_count = excluded.retry_count,
                 error_message = excluded.error_message,
                 context_json = excluded.context_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&record.workflow_id)
        .bind(&record.thread_id.0)
        .bind(&record.procurement_id.0)
        .bind(&record.current_step)
        .bind(record.status.as_str())
        .bind(i64::from(record.retry_count))
        .bind(&record.error_message)
        .bind(context_json)
        .bind(record.started_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM workflow_checkpoint WHERE thread_id = ?"
        ))
        .bind(&thread_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_checkpoint(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM workflow_checkpoint WHERE workflow_id = ?"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_checkpoint(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_procurement(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM workflow_checkpoint
             WHERE procurement_id = ? ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(&procurement_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_checkpoint(r)?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<CheckpointRecord>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM workflow_checkpoint
             WHERE status NOT IN ('completed', 'rejected', 'error', 'timeout')
             ORDER BY started_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_checkpoint).collect()
    }
}
