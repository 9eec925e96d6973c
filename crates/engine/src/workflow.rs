//! The durable workflow engine. Nodes are uniform (context in, context and
//! UI events out), wrapped in bounded retry, and checkpointed after every
//! step so a crash resumes from the last completed node.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use procura_core::approvals::{build_artifact, classify_reply};
use procura_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use procura_core::domain::approval::{ApprovalDecision, ResumeAction};
use procura_core::domain::negotiation::VendorQuote;
use procura_core::domain::procurement::{
    Actor, LineItem, PaymentReceipt, ProcurementId, ProcurementRequest, ThreadId, UiEvent,
    WorkflowContext,
};
use procura_core::errors::ProcurementError;
use procura_core::workflow::retry::RetryPolicy;
use procura_core::workflow::states::{transition, WorkflowEvent, WorkflowStatus};
use procura_store::{AuditLog, CheckpointRecord, CheckpointRepository};

use crate::broadcast::ConnectionManager;
use crate::collaborators::{
    InventoryService, ItemExtractor, OrgDirectory, PaymentGateway, VendorDirectory,
};
use crate::negotiation::{NegotiationCoordinator, QuoteIntake};
use crate::EngineError;

const STEP_INTAKE: &str = "intake";
const STEP_ANALYZE: &str = "analyze_request";
const STEP_INVENTORY: &str = "check_inventory";
const STEP_FETCH_QUOTES: &str = "fetch_quotes";
const STEP_NORMALIZE: &str = "normalize_quotes";
const STEP_PAYMENT: &str = "process_payment";
const STEP_COMPLETE: &str = "complete";

/// What a caller hands to `resume`: either a canonical action or free text
/// whose approval intent has to be classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeInput {
    Action { action: String, items: Option<Vec<LineItem>> },
    Message(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    Completed { receipt: PaymentReceipt },
    Rejected,
    Cancelled,
    /// Unrecognized free text: still suspended, nothing mutated.
    Waiting,
    /// `retry`: the approval card was re-emitted, still suspended.
    ArtifactResent,
    /// `modify`: items merged, a fresh quote round is underway.
    QuotesReopened,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeadlineReport {
    pub finalized: u32,
    pub expired: u32,
}

pub struct WorkflowEngine {
    checkpoints: Arc<dyn CheckpointRepository>,
    coordinator: Arc<NegotiationCoordinator>,
    directory: Arc<dyn VendorDirectory>,
    extractor: Arc<dyn ItemExtractor>,
    inventory: Arc<dyn InventoryService>,
    payments: Arc<dyn PaymentGateway>,
    orgs: Arc<dyn OrgDirectory>,
    audit: Arc<dyn AuditLog>,
    connections: Arc<ConnectionManager>,
    retry: RetryPolicy,
    workflow_timeout: Duration,
}

#[allow(clippy::too_many_arguments)]
impl WorkflowEngine {
    pub fn new(
        checkpoints: Arc<dyn CheckpointRepository>,
        coordinator: Arc<NegotiationCoordinator>,
        directory: Arc<dyn VendorDirectory>,
        extractor: Arc<dyn ItemExtractor>,
        inventory: Arc<dyn InventoryService>,
        payments: Arc<dyn PaymentGateway>,
        orgs: Arc<dyn OrgDirectory>,
        audit: Arc<dyn AuditLog>,
        connections: Arc<ConnectionManager>,
        retry: RetryPolicy,
        workflow_timeout: Duration,
    ) -> Self {
        Self {
            checkpoints,
            coordinator,
            directory,
            extractor,
            inventory,
            payments,
            orgs,
            audit,
            connections,
            retry,
            workflow_timeout,
        }
    }

    /// Validates the request, creates the Pending checkpoint and runs nodes
    /// until the quote-collection suspension. Fatal node failures land in
    /// the Error terminal and surface to the caller.
    pub async fn start(&self, request: ProcurementRequest) -> Result<ThreadId, EngineError> {
        request.validate()?;
        if !self.orgs.org_exists(&request.org_id).await? {
            return Err(EngineError::validation(format!(
                "unknown org `{}`",
                request.org_id.0
            )));
        }

        let workflow_id = Uuid::new_v4().to_string();
        let thread_id = ThreadId(format!("wf-{workflow_id}"));
        let now = Utc::now();
        let mut record = CheckpointRecord {
            workflow_id,
            thread_id: thread_id.clone(),
            procurement_id: request.id.clone(),
            current_step: STEP_INTAKE.to_string(),
            status: WorkflowStatus::Pending,
            retry_count: 0,
            error_message: None,
            context: WorkflowContext::for_request(request),
            started_at: now,
            updated_at: now,
        };
        self.checkpoints.save(&record).await?;
        self.audit_event(&record, "workflow.started", AuditOutcome::Success, None).await?;

        match self.run_to_suspension(&mut record).await {
            Ok(()) => Ok(thread_id),
            Err(EngineError::Domain(err)) => {
                self.fail(&mut record, &err).await?;
                Err(err.into())
            }
            Err(err) => Err(err),
        }
    }

    async fn run_to_suspension(&self, record: &mut CheckpointRecord) -> Result<(), EngineError> {
        self.apply_transition(record, &WorkflowEvent::IntakeAccepted, "workflow-engine").await?;

        // Analyze: an extractor that finds nothing yields the fallback item
        // rather than an empty set.
        let description = record.context.request.description.clone();
        let extractor = Arc::clone(&self.extractor);
        let extracted = self
            .run_with_retry(record, STEP_ANALYZE, || {
                let extractor = Arc::clone(&extractor);
                let description = description.clone();
                async move { extractor.extract(&description).await }
            })
            .await?;
        record.context.items = if extracted.is_empty() {
            if record.context.request.items.is_empty() {
                vec![LineItem::fallback(&description)]
            } else {
                record.context.request.items.clone()
            }
        } else {
            extracted
        };
        self.save(record).await?;

        self.apply_transition(record, &WorkflowEvent::ItemsExtracted, "workflow-engine").await?;

        let items = record.context.items.clone();
        let inventory = Arc::clone(&self.inventory);
        let notes = self
            .run_with_retry(record, STEP_INVENTORY, || {
                let inventory = Arc::clone(&inventory);
                let items = items.clone();
                async move { inventory.check(&items).await }
            })
            .await?;
        record.context.inventory_notes = notes;
        self.save(record).await?;

        self.apply_transition(record, &WorkflowEvent::InventoryConfirmed, "workflow-engine")
            .await?;

        self.open_quote_round(record).await?;

        let update = UiEvent::StatusUpdate {
            status: WorkflowStatus::FetchingQuotes,
            message: "request for quotes sent to vendors".to_string(),
        };
        record.context.push_event(update.clone());
        self.save(record).await?;
        self.connections.send_to_user(&record.context.request.requester_id, &update).await;

        Ok(())
    }

    async fn open_quote_round(&self, record: &mut CheckpointRecord) -> Result<(), EngineError> {
        let org_id = record.context.request.org_id.clone();
        let items = record.context.items.clone();
        let directory = Arc::clone(&self.directory);
        let vendors = self
            .run_with_retry(record, STEP_FETCH_QUOTES, || {
                let directory = Arc::clone(&directory);
                let org_id = org_id.clone();
                let items = items.clone();
                async move { directory.vendors_for(&org_id, &items).await }
            })
            .await?;

        let report = self
            .coordinator
            .initiate(&record.procurement_id, &record.context.items, vendors)
            .await?;
        info!(
            event_name = "quote_round_opened",
            procurement_id = %record.procurement_id,
            thread_id = %record.thread_id,
            vendors_contacted = report.vendors_contacted,
            sent_count = report.sent_count,
            failed_count = report.failed_count,
        );
        self.save(record).await?;
        Ok(())
    }

    /// Feeds a vendor quote into the round and, when the round completes,
    /// advances the owning workflow through normalization to the approval
    /// suspension.
    pub async fn process_vendor_quote(
        &self,
        quote_round: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<QuoteIntake, EngineError> {
        let intake = self.coordinator.process_response(quote_round, quote).await?;

        if let QuoteIntake::Accepted { complete: true, .. } = intake {
            let mut record = self
                .checkpoints
                .find_by_procurement(quote_round)
                .await?
                .ok_or_else(|| {
                    EngineError::validation(format!("no workflow for procurement {quote_round}"))
                })?;
            if record.status == WorkflowStatus::FetchingQuotes {
                if let Err(EngineError::Domain(err)) = self.advance_after_quotes(&mut record).await
                {
                    self.fail(&mut record, &err).await?;
                    return Err(err.into());
                }
            }
        }

        Ok(intake)
    }

    async fn advance_after_quotes(&self, record: &mut CheckpointRecord) -> Result<(), EngineError> {
        record.current_step = STEP_NORMALIZE.to_string();
        let winner = self.coordinator.finalize(&record.procurement_id).await?;
        let negotiation = self.coordinator.negotiation(&record.procurement_id).await?;

        record.context.quotes = negotiation.quotes.clone();
        record.context.selected_quote = Some(winner.clone());
        self.save(record).await?;

        self.apply_transition(record, &WorkflowEvent::QuotesFinalized, "workflow-engine").await?;

        let vendor_name = NegotiationCoordinator::vendor_named(&negotiation, &winner.vendor_id);
        let artifact = build_artifact(
            &winner,
            &vendor_name,
            &record.context.quotes,
            &record.context.request.org_id,
        );
        record.context.push_event(UiEvent::ApprovalCard(artifact.clone()));
        self.save(record).await?;

        self.apply_transition(record, &WorkflowEvent::ApprovalRequested, "workflow-engine")
            .await?;
        self.audit_event(record, "approval.requested", AuditOutcome::Success, None).await?;

        self.connections
            .send_to_user(&record.context.request.requester_id, &UiEvent::ApprovalCard(artifact))
            .await;

        Ok(())
    }

    /// Applies a human decision to a suspended workflow. Authorization is
    /// checked before the action is interpreted and fails closed; an
    /// unrecognized free-text reply leaves everything untouched.
    pub async fn resume(
        &self,
        thread_id: &ThreadId,
        input: ResumeInput,
        actor: &Actor,
    ) -> Result<ResumeOutcome, EngineError> {
        let mut record = self.checkpoints.find_by_thread(thread_id).await?.ok_or_else(|| {
            EngineError::validation(format!("unknown workflow thread `{thread_id}`"))
        })?;

        if !actor.may_act_on(&record.context.request) {
            self.audit_event(
                &record,
                "approval.unauthorized",
                AuditOutcome::Rejected,
                Some(format!("user `{}` denied", actor.user_id.0)),
            )
            .await?;
            return Err(ProcurementError::Authorization {
                user: actor.user_id.0.clone(),
                org: actor.org_id.0.clone(),
            }
            .into());
        }

        if record.status != WorkflowStatus::WaitingApproval {
            return Err(EngineError::validation(format!(
                "workflow `{thread_id}` is not awaiting approval (status: {})",
                record.status.as_str()
            )));
        }

        let action = match input {
            ResumeInput::Action { action, items } => ResumeAction::from_parts(&action, items)?,
            ResumeInput::Message(text) => match classify_reply(&text) {
                ApprovalDecision::Approved => ResumeAction::Approve,
                ApprovalDecision::Rejected => ResumeAction::Reject,
                ApprovalDecision::Waiting => {
                    self.audit_event(
                        &record,
                        "approval.waiting",
                        AuditOutcome::Success,
                        Some("free-text reply carried no decision".to_string()),
                    )
                    .await?;
                    return Ok(ResumeOutcome::Waiting);
                }
            },
        };

        let actor_label = actor.user_id.0.clone();
        match action {
            ResumeAction::Approve => self.approve(&mut record, &actor_label).await,
            ResumeAction::Reject => self.reject(&mut record, &actor_label).await,
            ResumeAction::Cancel => {
                self.cancel_record(&mut record, &actor_label, "cancelled by requester").await?;
                Ok(ResumeOutcome::Cancelled)
            }
            ResumeAction::Modify { items } => self.modify(&mut record, items, &actor_label).await,
            ResumeAction::Retry => self.resend_artifact(&mut record).await,
        }
    }

    async fn approve(
        &self,
        record: &mut CheckpointRecord,
        actor: &str,
    ) -> Result<ResumeOutcome, EngineError> {
        self.apply_transition(record, &WorkflowEvent::ApprovalGranted, actor).await?;

        let quote = match record.context.selected_quote.clone() {
            Some(quote) => quote,
            None => {
                let err = ProcurementError::InvariantViolation(format!(
                    "workflow `{}` approved without a selected quote",
                    record.thread_id
                ));
                self.fail(record, &err).await?;
                return Err(err.into());
            }
        };

        let procurement_id = record.procurement_id.clone();
        let payments = Arc::clone(&self.payments);
        let payment = self
            .run_with_retry(record, STEP_PAYMENT, || {
                let payments = Arc::clone(&payments);
                let procurement_id = procurement_id.clone();
                let quote = quote.clone();
                async move { payments.charge(&procurement_id, &quote).await }
            })
            .await;
        let receipt = match payment {
            Ok(receipt) => receipt,
            Err(EngineError::Domain(err)) => {
                self.fail(record, &err).await?;
                return Err(err.into());
            }
            Err(err) => return Err(err),
        };

        record.context.payment = Some(receipt.clone());
        self.save(record).await?;

        record.current_step = STEP_COMPLETE.to_string();
        self.apply_transition(record, &WorkflowEvent::PaymentSettled, actor).await?;
        record.context.push_event(UiEvent::StatusUpdate {
            status: WorkflowStatus::Completed,
            message: format!("payment settled ({})", receipt.reference_id),
        });
        self.save(record).await?;

        self.connections
            .send_to_user(
                &record.context.request.requester_id,
                &UiEvent::StatusUpdate {
                    status: WorkflowStatus::Completed,
                    message: "procurement complete".to_string(),
                },
            )
            .await;

        Ok(ResumeOutcome::Completed { receipt })
    }

    async fn reject(
        &self,
        record: &mut CheckpointRecord,
        actor: &str,
    ) -> Result<ResumeOutcome, EngineError> {
        self.apply_transition(record, &WorkflowEvent::ApprovalDenied, actor).await?;
        record.context.push_event(UiEvent::StatusUpdate {
            status: WorkflowStatus::Rejected,
            message: "approval denied".to_string(),
        });
        self.save(record).await?;
        Ok(ResumeOutcome::Rejected)
    }

    async fn modify(
        &self,
        record: &mut CheckpointRecord,
        items: Vec<LineItem>,
        actor: &str,
    ) -> Result<ResumeOutcome, EngineError> {
        merge_items(&mut record.context.items, items);
        record.context.selected_quote = None;
        record.context.quotes.clear();
        self.save(record).await?;

        self.apply_transition(record, &WorkflowEvent::QuotesModified, actor).await?;

        match self.open_quote_round(record).await {
            Ok(()) => Ok(ResumeOutcome::QuotesReopened),
            Err(EngineError::Domain(err)) => {
                self.fail(record, &err).await?;
                Err(err.into())
            }
            Err(err) => Err(err),
        }
    }

    async fn resend_artifact(
        &self,
        record: &mut CheckpointRecord,
    ) -> Result<ResumeOutcome, EngineError> {
        let artifact = record.context.latest_approval_card().cloned().ok_or_else(|| {
            ProcurementError::InvariantViolation(format!(
                "workflow `{}` suspended without an approval card",
                record.thread_id
            ))
        })?;

        self.connections
            .send_to_user(&record.context.request.requester_id, &UiEvent::ApprovalCard(artifact))
            .await;
        self.audit_event(record, "approval.artifact_resent", AuditOutcome::Success, None).await?;

        Ok(ResumeOutcome::ArtifactResent)
    }

    /// Cancels a run from any state before payment. The negotiation is
    /// marked cancelled so late vendor responses stay auditable but inert.
    pub async fn cancel(
        &self,
        thread_id: &ThreadId,
        actor: &Actor,
    ) -> Result<(), EngineError> {
        let mut record = self.checkpoints.find_by_thread(thread_id).await?.ok_or_else(|| {
            EngineError::validation(format!("unknown workflow thread `{thread_id}`"))
        })?;

        if !actor.may_act_on(&record.context.request) {
            return Err(ProcurementError::Authorization {
                user: actor.user_id.0.clone(),
                org: actor.org_id.0.clone(),
            }
            .into());
        }

        self.cancel_record(&mut record, &actor.user_id.0, "cancelled by requester").await
    }

    async fn cancel_record(
        &self,
        record: &mut CheckpointRecord,
        actor: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        if record.status.is_terminal() || record.status == WorkflowStatus::Paid {
            return Err(EngineError::validation(format!(
                "workflow `{}` can no longer be cancelled (status: {})",
                record.thread_id,
                record.status.as_str()
            )));
        }

        self.apply_transition(record, &WorkflowEvent::CancelRequested, actor).await?;
        self.coordinator.cancel(&record.procurement_id).await?;

        record.error_message = Some(reason.to_string());
        record.context.push_event(UiEvent::StatusUpdate {
            status: WorkflowStatus::Rejected,
            message: reason.to_string(),
        });
        self.save(record).await?;
        Ok(())
    }

    /// Forces every overdue open negotiation to a decision: finalize when
    /// quotes exist, expire the round (and error the workflow) when none do.
    pub async fn enforce_deadlines(&self, now: DateTime<Utc>) -> Result<DeadlineReport, EngineError> {
        let mut report = DeadlineReport::default();

        for negotiation in self.coordinator.list_open().await? {
            if now <= negotiation.deadline {
                continue;
            }

            let record = self.checkpoints.find_by_procurement(&negotiation.procurement_id).await?;
            let mut record = match record {
                Some(record) if record.status == WorkflowStatus::FetchingQuotes => record,
                _ => continue,
            };

            if negotiation.quotes.is_empty() {
                self.coordinator.cancel(&negotiation.procurement_id).await?;
                let err = ProcurementError::NoQuotes(negotiation.procurement_id.clone());
                self.fail(&mut record, &err).await?;
                report.expired += 1;
            } else {
                match self.advance_after_quotes(&mut record).await {
                    Ok(()) => report.finalized += 1,
                    Err(EngineError::Domain(err)) => {
                        self.fail(&mut record, &err).await?;
                        report.expired += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(report)
    }

    /// Maps runs older than the whole-workflow timeout to the Timeout
    /// terminal, distinct from the negotiation deadline.
    pub async fn enforce_timeouts(&self, now: DateTime<Utc>) -> Result<u32, EngineError> {
        let mut timed_out = 0u32;

        for mut record in self.checkpoints.list_active().await? {
            if now - record.started_at <= self.workflow_timeout {
                continue;
            }
            self.apply_transition(&mut record, &WorkflowEvent::TimedOut, "sweep-scheduler")
                .await?;
            record.error_message = Some("workflow timed out".to_string());
            self.save(&mut record).await?;
            timed_out += 1;
        }

        Ok(timed_out)
    }

    pub async fn status(&self, thread_id: &ThreadId) -> Result<WorkflowStatus, EngineError> {
        let record = self.checkpoints.find_by_thread(thread_id).await?.ok_or_else(|| {
            EngineError::validation(format!("unknown workflow thread `{thread_id}`"))
        })?;
        Ok(record.status)
    }

    async fn run_with_retry<T, F, Fut>(
        &self,
        record: &mut CheckpointRecord,
        step: &str,
        operation: F,
    ) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProcurementError>>,
    {
        record.current_step = step.to_string();

        loop {
            match operation().await {
                Ok(value) => {
                    record.error_message = None;
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && self.retry.should_retry(record.retry_count) => {
                    let delay = self.retry.backoff_delay(record.retry_count);
                    record.retry_count += 1;
                    record.error_message = Some(err.to_string());
                    self.save(record).await?;
                    warn!(
                        event_name = "node_retry",
                        thread_id = %record.thread_id,
                        step,
                        retry_count = record.retry_count,
                        error = %err,
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn apply_transition(
        &self,
        record: &mut CheckpointRecord,
        event: &WorkflowEvent,
        actor: &str,
    ) -> Result<(), EngineError> {
        let before = record.status;
        let after = transition(before, event).map_err(ProcurementError::from)?;
        record.status = after;
        self.save(record).await?;

        self.audit
            .record(
                AuditEvent::new(
                    &self.context_for(record, actor),
                    "workflow.transition",
                    AuditCategory::Workflow,
                    AuditOutcome::Success,
                )
                .with_transition(before, after),
            )
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        record: &mut CheckpointRecord,
        err: &ProcurementError,
    ) -> Result<(), EngineError> {
        if record.status.is_terminal() {
            return Ok(());
        }

        let before = record.status;
        record.status = transition(before, &WorkflowEvent::FailureExhausted)
            .map_err(ProcurementError::from)?;
        record.error_message = Some(err.to_string());
        self.save(record).await?;

        self.audit
            .record(
                AuditEvent::new(
                    &self.context_for(record, "workflow-engine"),
                    "workflow.failed",
                    AuditCategory::Workflow,
                    AuditOutcome::Failed,
                )
                .with_transition(before, record.status)
                .with_message(err.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn save(&self, record: &mut CheckpointRecord) -> Result<(), EngineError> {
        record.updated_at = Utc::now();
        self.checkpoints.save(record).await?;
        Ok(())
    }

    fn context_for(&self, record: &CheckpointRecord, actor: &str) -> AuditContext {
        AuditContext::new(
            Some(record.procurement_id.clone()),
            Some(record.thread_id.clone()),
            record.workflow_id.clone(),
            actor,
        )
    }

    async fn audit_event(
        &self,
        record: &CheckpointRecord,
        event_type: &str,
        outcome: AuditOutcome,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let mut event = AuditEvent::new(
            &self.context_for(record, "workflow-engine"),
            event_type,
            AuditCategory::Workflow,
            outcome,
        );
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.audit.record(event).await?;
        Ok(())
    }
}

/// Items with the same name are replaced by the incoming revision; new names
/// are appended.
fn merge_items(existing: &mut Vec<LineItem>, incoming: Vec<LineItem>) {
    for item in incoming {
        match existing.iter_mut().find(|candidate| candidate.name == item.name) {
            Some(candidate) => *candidate = item,
            None => existing.push(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::negotiation::{QuoteId, Vendor, VendorId, VendorQuote};
    use procura_core::domain::procurement::{
        Actor, LineItem, OrgId, ProcurementId, ProcurementRequest, UserId,
    };
    use procura_core::errors::ProcurementError;
    use procura_core::workflow::retry::RetryPolicy;
    use procura_core::workflow::states::WorkflowStatus;
    use procura_store::{
        connect_with_settings, migrations, CheckpointRepository, InMemoryAuditLog,
        SqlCheckpointRepository, SqlNegotiationRepository,
    };

    use super::{merge_items, ResumeInput, ResumeOutcome, WorkflowEngine};
    use crate::broadcast::ConnectionManager;
    use crate::collaborators::{
        AlwaysInStock, RecordingNotifier, StaticOrgDirectory, StaticVendorDirectory,
        StubItemExtractor, StubPaymentGateway,
    };
    use crate::negotiation::{NegotiationCoordinator, QuoteIntake};
    use crate::EngineError;

    fn vendor(id: &str) -> Vendor {
        Vendor {
            id: VendorId(id.to_string()),
            name: format!("Vendor {id}"),
            email: format!("{id}@vendors.example"),
        }
    }

    fn quote(vendor_id: &str, amount: i64) -> VendorQuote {
        VendorQuote {
            vendor_id: VendorId(vendor_id.to_string()),
            quote_id: QuoteId(format!("QT-{vendor_id}-{amount}")),
            total_amount: Decimal::new(amount, 0),
            currency: "USD".to_string(),
            delivery_time: "1 week".to_string(),
            items: Vec::new(),
            received_at: Utc::now(),
            valid_until: None,
        }
    }

    fn request(procurement: &str) -> ProcurementRequest {
        ProcurementRequest {
            id: ProcurementId(procurement.to_string()),
            org_id: OrgId("org-1".to_string()),
            requester_id: UserId("user-1".to_string()),
            description: "3 laptops".to_string(),
            items: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn owner() -> Actor {
        Actor { user_id: UserId("user-1".to_string()), org_id: OrgId("org-1".to_string()) }
    }

    struct Harness {
        engine: WorkflowEngine,
        checkpoints: Arc<SqlCheckpointRepository>,
    }

    async fn harness_with(vendors: Vec<Vendor>, extractor: StubItemExtractor) -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let checkpoints = Arc::new(SqlCheckpointRepository::new(pool.clone()));
        let audit = Arc::new(InMemoryAuditLog::default());
        let coordinator = Arc::new(NegotiationCoordinator::new(
            Arc::new(SqlNegotiationRepository::new(pool)),
            RecordingNotifier::new(),
            audit.clone(),
            Duration::hours(48),
            Duration::hours(12),
        ));

        let engine = WorkflowEngine::new(
            checkpoints.clone(),
            coordinator,
            Arc::new(StaticVendorDirectory::new(vendors)),
            Arc::new(extractor),
            Arc::new(AlwaysInStock),
            Arc::new(StubPaymentGateway),
            Arc::new(StaticOrgDirectory::with_orgs(["org-1".to_string()])),
            audit,
            Arc::new(ConnectionManager::unbounded()),
            RetryPolicy { max_retries: 3, base_delay_ms: 1 },
            Duration::hours(168),
        );

        Harness { engine, checkpoints }
    }

    async fn harness(vendors: Vec<Vendor>) -> Harness {
        harness_with(vendors, StubItemExtractor::new(vec![LineItem::fallback("laptops")])).await
    }

    #[tokio::test]
    async fn start_suspends_at_fetching_quotes() {
        let harness = harness(vec![vendor("v0"), vendor("v1")]).await;

        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let record = harness
            .checkpoints
            .find_by_thread(&thread_id)
            .await
            .expect("find")
            .expect("present");

        assert_eq!(record.status, WorkflowStatus::FetchingQuotes);
        assert!(!record.context.items.is_empty());
        assert!(!record.context.inventory_notes.is_empty());
    }

    #[tokio::test]
    async fn start_with_no_vendors_lands_in_error() {
        let harness = harness(Vec::new()).await;

        let error = harness.engine.start(request("PR-1")).await.expect_err("no vendors");
        assert!(error.to_string().contains("No vendors"));

        let record = harness
            .checkpoints
            .find_by_procurement(&ProcurementId("PR-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.status, WorkflowStatus::Error);
        assert!(record.error_message.as_deref().unwrap_or("").contains("No vendors"));
    }

    #[tokio::test]
    async fn transient_extractor_failures_are_retried() {
        let harness = harness_with(
            vec![vendor("v0")],
            StubItemExtractor::failing_first(vec![LineItem::fallback("laptops")], 2),
        )
        .await;

        let thread_id = harness.engine.start(request("PR-1")).await.expect("start survives");
        let record = harness
            .checkpoints
            .find_by_thread(&thread_id)
            .await
            .expect("find")
            .expect("present");

        assert_eq!(record.status, WorkflowStatus::FetchingQuotes);
        assert_eq!(record.retry_count, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_become_fatal() {
        let harness = harness_with(
            vec![vendor("v0")],
            StubItemExtractor::failing_first(vec![LineItem::fallback("laptops")], 10),
        )
        .await;

        let error = harness.engine.start(request("PR-1")).await.expect_err("budget exhausted");
        assert!(matches!(error, EngineError::Domain(ProcurementError::TransientIo(_))));

        let record = harness
            .checkpoints
            .find_by_procurement(&ProcurementId("PR-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.status, WorkflowStatus::Error);
        assert_eq!(record.retry_count, 3);
    }

    #[tokio::test]
    async fn complete_round_advances_to_waiting_approval() {
        let harness = harness(vec![vendor("a"), vendor("b"), vendor("c")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());

        harness.engine.process_vendor_quote(&id, &quote("a", 1000)).await.expect("a");
        harness.engine.process_vendor_quote(&id, &quote("b", 1200)).await.expect("b");
        harness.engine.process_vendor_quote(&id, &quote("c", 900)).await.expect("c");

        let record = harness
            .checkpoints
            .find_by_thread(&thread_id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.status, WorkflowStatus::WaitingApproval);

        let selected = record.context.selected_quote.as_ref().expect("winner selected");
        assert_eq!(selected.vendor_id, VendorId("c".to_string()));

        let card = record.context.latest_approval_card().expect("approval card emitted");
        assert_eq!(card.vendor_name, "Vendor c");
        assert_eq!(card.total_amount, Decimal::new(900, 0));
    }

    #[tokio::test]
    async fn approve_pays_and_completes() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        let outcome = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "approve".to_string(), items: None },
                &owner(),
            )
            .await
            .expect("approve");

        match outcome {
            ResumeOutcome::Completed { receipt } => assert_eq!(receipt.status, "settled"),
            other => panic!("expected completion, got {other:?}"),
        }

        assert_eq!(
            harness.engine.status(&thread_id).await.expect("status"),
            WorkflowStatus::Completed
        );
    }

    #[tokio::test]
    async fn second_decision_after_completion_is_rejected() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "approve".to_string(), items: None },
                &owner(),
            )
            .await
            .expect("first decision");

        let error = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "reject".to_string(), items: None },
                &owner(),
            )
            .await
            .expect_err("second decision");
        assert!(error.to_string().contains("not awaiting approval"));
    }

    #[tokio::test]
    async fn unauthorized_actor_fails_closed() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        let outsider =
            Actor { user_id: UserId("intruder".to_string()), org_id: OrgId("org-2".to_string()) };
        let error = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "approve".to_string(), items: None },
                &outsider,
            )
            .await
            .expect_err("must fail closed");
        assert!(matches!(error, EngineError::Domain(ProcurementError::Authorization { .. })));

        assert_eq!(
            harness.engine.status(&thread_id).await.expect("status"),
            WorkflowStatus::WaitingApproval
        );
    }

    #[tokio::test]
    async fn unknown_action_rejected_without_mutation() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        let error = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "escalate".to_string(), items: None },
                &owner(),
            )
            .await
            .expect_err("unknown action");
        assert!(error.to_string().contains("unsupported resume action"));

        assert_eq!(
            harness.engine.status(&thread_id).await.expect("status"),
            WorkflowStatus::WaitingApproval
        );
    }

    #[tokio::test]
    async fn free_text_without_intent_stays_suspended() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        let outcome = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Message("what is the delivery window?".to_string()),
                &owner(),
            )
            .await
            .expect("waiting");
        assert_eq!(outcome, ResumeOutcome::Waiting);

        let approved = harness
            .engine
            .resume(&thread_id, ResumeInput::Message("ok, approved!".to_string()), &owner())
            .await
            .expect("approve via text");
        assert!(matches!(approved, ResumeOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn cancel_before_payment_rejects_and_closes_negotiation() {
        let harness = harness(vec![vendor("a"), vendor("b")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        harness.engine.cancel(&thread_id, &owner()).await.expect("cancel");
        assert_eq!(
            harness.engine.status(&thread_id).await.expect("status"),
            WorkflowStatus::Rejected
        );

        // A late quote is kept for audit but reported as after close.
        let late = harness.engine.process_vendor_quote(&id, &quote("b", 1)).await.expect("late");
        assert_eq!(late, QuoteIntake::RecordedAfterClose);
    }

    #[tokio::test]
    async fn modify_reopens_quote_collection() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        let extra = LineItem {
            name: "docking station".to_string(),
            quantity: 3,
            unit: "unit".to_string(),
            specification: None,
        };
        let outcome = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "modify".to_string(), items: Some(vec![extra]) },
                &owner(),
            )
            .await
            .expect("modify");
        assert_eq!(outcome, ResumeOutcome::QuotesReopened);

        let record = harness
            .checkpoints
            .find_by_thread(&thread_id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.status, WorkflowStatus::FetchingQuotes);
        assert!(record.context.items.iter().any(|item| item.name == "docking station"));
        assert!(record.context.selected_quote.is_none());

        // Fresh round: the earlier quote is gone and a new one completes it.
        harness.engine.process_vendor_quote(&id, &quote("a", 650)).await.expect("new round quote");
        assert_eq!(
            harness.engine.status(&thread_id).await.expect("status"),
            WorkflowStatus::WaitingApproval
        );
    }

    #[tokio::test]
    async fn retry_action_resends_artifact_without_state_change() {
        let harness = harness(vec![vendor("a")]).await;
        let thread_id = harness.engine.start(request("PR-1")).await.expect("start");
        let id = ProcurementId("PR-1".to_string());
        harness.engine.process_vendor_quote(&id, &quote("a", 500)).await.expect("quote");

        let before = harness.engine.status(&thread_id).await.expect("status");
        let outcome = harness
            .engine
            .resume(
                &thread_id,
                ResumeInput::Action { action: "retry".to_string(), items: None },
                &owner(),
            )
            .await
            .expect("retry");

        assert_eq!(outcome, ResumeOutcome::ArtifactResent);
        assert_eq!(harness.engine.status(&thread_id).await.expect("status"), before);
    }

    #[tokio::test]
    async fn overdue_workflows_map_to_timeout_terminal() {
        let harness = harness(vec![vendor("a")]).await;
        harness.engine.start(request("PR-1")).await.expect("start");

        let timed_out = harness
            .engine
            .enforce_timeouts(Utc::now() + Duration::hours(169))
            .await
            .expect("sweep");
        assert_eq!(timed_out, 1);

        let record = harness
            .checkpoints
            .find_by_procurement(&ProcurementId("PR-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.status, WorkflowStatus::Timeout);
    }

    #[tokio::test]
    async fn deadline_sweep_finalizes_partial_rounds_and_expires_empty_ones() {
        let harness = harness(vec![vendor("a"), vendor("b")]).await;
        let with_quotes = harness.engine.start(request("PR-quoted")).await.expect("start");
        let without = harness.engine.start(request("PR-silent")).await.expect("start");

        harness
            .engine
            .process_vendor_quote(&ProcurementId("PR-quoted".to_string()), &quote("a", 700))
            .await
            .expect("one quote of two");

        let report = harness
            .engine
            .enforce_deadlines(Utc::now() + Duration::hours(49))
            .await
            .expect("sweep");
        assert_eq!(report.finalized, 1);
        assert_eq!(report.expired, 1);

        assert_eq!(
            harness.engine.status(&with_quotes).await.expect("status"),
            WorkflowStatus::WaitingApproval
        );
        assert_eq!(
            harness.engine.status(&without).await.expect("status"),
            WorkflowStatus::Error
        );
    }

    #[test]
    fn merge_replaces_same_name_and_appends_new() {
        let mut items = vec![LineItem {
            name: "laptop".to_string(),
            quantity: 3,
            unit: "unit".to_string(),
            specification: None,
        }];
        merge_items(
            &mut items,
            vec![
                LineItem {
                    name: "laptop".to_string(),
                    quantity: 5,
                    unit: "unit".to_string(),
                    specification: Some("32GB RAM".to_string()),
                },
                LineItem {
                    name: "monitor".to_string(),
                    quantity: 5,
                    unit: "unit".to_string(),
                    specification: None,
                },
            ],
        );

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].quantity, 5);
        assert_eq!(items[0].specification.as_deref(), Some("32GB RAM"));
        assert_eq!(items[1].name, "monitor");
    }
}
