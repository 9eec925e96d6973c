use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use procura_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use procura_core::domain::procurement::{ProcurementId, ThreadId};
use procura_core::workflow::states::WorkflowStatus;

use crate::{DbPool, StoreError};

/// Write-only audit trail. Recording failures are surfaced to the caller;
/// the engine decides whether to log and continue.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError>;

    async fn find_by_procurement(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Vec<AuditEvent>, StoreError>;
}

pub struct SqlAuditLog {
    pool: DbPool,
}

impl SqlAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn category_as_str(category: &AuditCategory) -> &'static str {
    match category {
        AuditCategory::Workflow => "workflow",
        AuditCategory::Negotiation => "negotiation",
        AuditCategory::Approval => "approval",
        AuditCategory::Payment => "payment",
        AuditCategory::Session => "session",
        AuditCategory::System => "system",
    }
}

fn parse_category(value: &str) -> AuditCategory {
    match value {
        "negotiation" => AuditCategory::Negotiation,
        "approval" => AuditCategory::Approval,
        "payment" => AuditCategory::Payment,
        "session" => AuditCategory::Session,
        "system" => AuditCategory::System,
        _ => AuditCategory::Workflow,
    }
}

fn outcome_as_str(outcome: &AuditOutcome) -> &'static str {
    match outcome {
        AuditOutcome::Success => "success",
        AuditOutcome::Rejected => "rejected",
        AuditOutcome::Failed => "failed",
    }
}

fn parse_outcome(value: &str) -> AuditOutcome {
    match value {
        "rejected" => AuditOutcome::Rejected,
        "failed" => AuditOutcome::Failed,
        _ => AuditOutcome::Success,
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, StoreError> {
    let event_id: String =
        row.try_get("event_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let procurement_id: Option<String> =
        row.try_get("procurement_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let thread_id: Option<String> =
        row.try_get("thread_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let correlation_id: String =
        row.try_get("correlation_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let event_type: String =
        row.try_get("event_type").map_err(|e| StoreError::Decode(e.to_string()))?;
    let category: String =
        row.try_get("category").map_err(|e| StoreError::Decode(e.to_string()))?;
    let actor: String = row.try_get("actor").map_err(|e| StoreError::Decode(e.to_string()))?;
    let outcome: String = row.try_get("outcome").map_err(|e| StoreError::Decode(e.to_string()))?;
    let before_state: Option<String> =
        row.try_get("before_state").map_err(|e| StoreError::Decode(e.to_string()))?;
    let after_state: Option<String> =
        row.try_get("after_state").map_err(|e| StoreError::Decode(e.to_string()))?;
    let message: Option<String> =
        row.try_get("message").map_err(|e| StoreError::Decode(e.to_string()))?;
    let metadata_json: String =
        row.try_get("metadata_json").map_err(|e| StoreError::Decode(e.to_string()))?;
    let occurred_at_str: String =
        row.try_get("occurred_at").map_err(|e| StoreError::Decode(e.to_string()))?;

    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|err| StoreError::Decode(format!("bad audit metadata: {err}")))?;
    let occurred_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&occurred_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Decode(format!("bad occurred_at `{occurred_at_str}`: {err}")))?;

    Ok(AuditEvent {
        event_id,
        procurement_id: procurement_id.map(ProcurementId),
        thread_id: thread_id.map(ThreadId),
        correlation_id,
        event_type,
        category: parse_category(&category),
        actor,
        outcome: parse_outcome(&outcome),
        before_state: before_state.as_deref().and_then(WorkflowStatus::parse),
        after_state: after_state.as_deref().and_then(WorkflowStatus::parse),
        message,
        metadata,
        occurred_at,
    })
}

#[async_trait]
impl AuditLog for SqlAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|err| StoreError::Decode(format!("unencodable audit metadata: {err}")))?;

        sqlx::query(
            "INSERT INTO audit_event (event_id, procurement_id, thread_id, correlation_id,
                                      event_type, category, actor, outcome, before_state,
                                      after_state, message, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.procurement_id.as_ref().map(|id| id.0.clone()))
        .bind(event.thread_id.as_ref().map(|id| id.0.clone()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(category_as_str(&event.category))
        .bind(&event.actor)
        .bind(outcome_as_str(&event.outcome))
        .bind(event.before_state.map(|s| s.as_str()))
        .bind(event.after_state.map(|s| s.as_str()))
        .bind(&event.message)
        .bind(metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_procurement(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT event_id, procurement_id, thread_id, correlation_id, event_type, category,
                    actor, outcome, before_state, after_state, message, metadata_json, occurred_at
             FROM audit_event WHERE procurement_id = ? ORDER BY occurred_at ASC, event_id ASC",
        )
        .bind(&procurement_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditLog {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }

    async fn find_by_procurement(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .events()
            .into_iter()
            .filter(|event| event.procurement_id.as_ref() == Some(procurement_id))
            .collect())
    }
}
