//! Orchestrates one quote-collection round per procurement: RFQ fan-out,
//! quote intake, phase classification, reminders and finalization.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;
use tracing::{info, warn};

use procura_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use procura_core::domain::negotiation::{
    Negotiation, NegotiationPhase, Vendor, VendorId, VendorQuote,
};
use procura_core::domain::procurement::{LineItem, ProcurementId};
use procura_core::errors::ProcurementError;
use procura_core::negotiation::{classify, reminder_due, select_winner};
use procura_store::{AuditLog, NegotiationRepository};

use crate::collaborators::Notifier;
use crate::EngineError;

#[derive(Clone, Debug, PartialEq)]
pub struct InitiationReport {
    pub vendors_contacted: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuoteIntake {
    Accepted { responded: u32, contacted: u32, complete: bool },
    /// Stored for the audit trail but the round is already decided.
    RecordedAfterClose,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub negotiations_checked: u32,
    pub reminders_sent: u32,
    pub delivery_failures: u32,
}

pub struct NegotiationCoordinator {
    repo: Arc<dyn NegotiationRepository>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    horizon: Duration,
    cadence: Duration,
}

impl NegotiationCoordinator {
    pub fn new(
        repo: Arc<dyn NegotiationRepository>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        horizon: Duration,
        cadence: Duration,
    ) -> Self {
        Self { repo, notifier, audit, horizon, cadence }
    }

    fn audit_context(&self, procurement_id: &ProcurementId) -> AuditContext {
        AuditContext::new(
            Some(procurement_id.clone()),
            None,
            uuid::Uuid::new_v4().to_string(),
            "negotiation-coordinator",
        )
    }

    /// Opens a round and contacts every vendor concurrently. Vendor delivery
    /// is best effort; the round proceeds as long as the record is persisted.
    pub async fn initiate(
        &self,
        procurement_id: &ProcurementId,
        items: &[LineItem],
        vendors: Vec<Vendor>,
    ) -> Result<InitiationReport, EngineError> {
        if vendors.is_empty() {
            return Err(ProcurementError::NoVendors(procurement_id.clone()).into());
        }

        let now = Utc::now();
        let negotiation =
            Negotiation::open(procurement_id.clone(), vendors.clone(), now + self.horizon, now);
        self.repo.save_round(&negotiation).await?;

        let mut join_set = JoinSet::new();
        for vendor in vendors {
            let notifier = Arc::clone(&self.notifier);
            let procurement_id = procurement_id.clone();
            let items = items.to_vec();
            join_set
                .spawn(async move { notifier.send_rfq(&vendor, &procurement_id, &items).await });
        }

        let mut sent_count = 0u32;
        let mut failed_count = 0u32;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(true) => sent_count += 1,
                Ok(false) | Err(_) => failed_count += 1,
            }
        }

        if failed_count > 0 {
            warn!(
                event_name = "rfq_fanout_partial_failure",
                procurement_id = %procurement_id,
                sent_count,
                failed_count,
                "some vendors were not reached"
            );
        }

        self.audit
            .record(
                AuditEvent::new(
                    &self.audit_context(procurement_id),
                    "negotiation.initiated",
                    AuditCategory::Negotiation,
                    AuditOutcome::Success,
                )
                .with_metadata("vendors_contacted", negotiation.vendors_contacted.to_string())
                .with_metadata("sent_count", sent_count.to_string())
                .with_metadata("failed_count", failed_count.to_string()),
            )
            .await?;

        Ok(InitiationReport {
            vendors_contacted: negotiation.vendors_contacted,
            sent_count,
            failed_count,
            deadline: negotiation.deadline,
        })
    }

    /// Accepts a quote from a contacted vendor. A later quote from the same
    /// vendor replaces the earlier one without inflating the response count;
    /// a vendor outside the round's contacted list is refused before anything
    /// is written, so it can never complete the round or win it.
    pub async fn process_response(
        &self,
        procurement_id: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<QuoteIntake, EngineError> {
        let negotiation = self.require(procurement_id).await?;

        if !negotiation.vendors.iter().any(|vendor| vendor.id == quote.vendor_id) {
            warn!(
                event_name = "vendor_quote_refused",
                procurement_id = %procurement_id,
                vendor_id = %quote.vendor_id.0,
                "quote from a vendor that was not contacted"
            );
            self.audit
                .record(
                    AuditEvent::new(
                        &self.audit_context(procurement_id),
                        "negotiation.quote_unknown_vendor",
                        AuditCategory::Negotiation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("vendor_id", quote.vendor_id.0.clone()),
                )
                .await?;
            return Err(ProcurementError::Validation(format!(
                "vendor `{}` was not contacted for procurement {procurement_id}",
                quote.vendor_id.0
            ))
            .into());
        }

        self.repo.upsert_quote(procurement_id, quote).await?;

        if negotiation.cancelled || negotiation.finalized_at.is_some() {
            self.audit
                .record(
                    AuditEvent::new(
                        &self.audit_context(procurement_id),
                        "negotiation.quote_after_close",
                        AuditCategory::Negotiation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("vendor_id", quote.vendor_id.0.clone()),
                )
                .await?;
            return Ok(QuoteIntake::RecordedAfterClose);
        }

        let updated = self.require(procurement_id).await?;
        updated.check_invariants()?;

        let responded = updated.vendors_responded();
        let contacted = updated.vendors_contacted;
        info!(
            event_name = "vendor_quote_received",
            procurement_id = %procurement_id,
            vendor_id = %quote.vendor_id.0,
            responded,
            contacted,
        );

        Ok(QuoteIntake::Accepted {
            responded,
            contacted,
            complete: responded == contacted && Utc::now() <= updated.deadline,
        })
    }

    /// Deadline passage is checked lazily here; nothing mutates until a
    /// sweep or finalize acts on it.
    pub async fn status(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<NegotiationPhase, EngineError> {
        let negotiation = self.require(procurement_id).await?;
        Ok(classify(&negotiation, Utc::now()))
    }

    pub async fn negotiation(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Negotiation, EngineError> {
        self.require(procurement_id).await
    }

    /// Re-notifies non-responders across all open negotiations. The caller
    /// holds the sweep lease; this method only applies the cadence rules.
    pub async fn send_reminders(&self, now: DateTime<Utc>) -> Result<ReminderReport, EngineError> {
        let mut report = ReminderReport::default();

        for negotiation in self.repo.list_open().await? {
            report.negotiations_checked += 1;
            if !reminder_due(&negotiation, now, self.cadence) {
                continue;
            }

            for vendor in negotiation.non_responders() {
                if self.notifier.send_reminder(vendor, &negotiation.procurement_id).await {
                    report.reminders_sent += 1;
                } else {
                    report.delivery_failures += 1;
                }
            }
            self.repo.mark_reminded(&negotiation.procurement_id, now).await?;
        }

        Ok(report)
    }

    /// Picks the cheapest quote (earliest received wins ties) exactly once.
    /// Subsequent calls return the stored winner without re-evaluating.
    pub async fn finalize(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<VendorQuote, EngineError> {
        let negotiation = self.require(procurement_id).await?;

        if let Some(winner_id) = &negotiation.winner_vendor_id {
            return stored_winner(&negotiation, winner_id).map_err(Into::into);
        }

        if negotiation.quotes.is_empty() {
            return Err(ProcurementError::NoQuotes(procurement_id.clone()).into());
        }

        let winner = match select_winner(&negotiation.quotes) {
            Some(winner) => winner.clone(),
            None => return Err(ProcurementError::NoQuotes(procurement_id.clone()).into()),
        };

        let finalized_here =
            self.repo.finalize(procurement_id, &winner.vendor_id, Utc::now()).await?;
        if !finalized_here {
            // Lost the race; the stored decision stands.
            let settled = self.require(procurement_id).await?;
            let winner_id = settled.winner_vendor_id.clone().ok_or_else(|| {
                ProcurementError::InvariantViolation(format!(
                    "negotiation {procurement_id} reported finalized without a winner"
                ))
            })?;
            return stored_winner(&settled, &winner_id).map_err(Into::into);
        }

        self.audit
            .record(
                AuditEvent::new(
                    &self.audit_context(procurement_id),
                    "negotiation.finalized",
                    AuditCategory::Negotiation,
                    AuditOutcome::Success,
                )
                .with_metadata("winner_vendor_id", winner.vendor_id.0.clone())
                .with_metadata("total_amount", winner.total_amount.to_string()),
            )
            .await?;

        Ok(winner)
    }

    pub async fn cancel(&self, procurement_id: &ProcurementId) -> Result<(), EngineError> {
        self.repo.cancel(procurement_id).await?;
        Ok(())
    }

    pub async fn list_open(&self) -> Result<Vec<Negotiation>, EngineError> {
        Ok(self.repo.list_open().await?)
    }

    pub fn vendor_named(negotiation: &Negotiation, vendor_id: &VendorId) -> String {
        negotiation
            .vendors
            .iter()
            .find(|vendor| &vendor.id == vendor_id)
            .map(|vendor| vendor.name.clone())
            .unwrap_or_else(|| vendor_id.0.clone())
    }

    async fn require(&self, procurement_id: &ProcurementId) -> Result<Negotiation, EngineError> {
        self.repo.find(procurement_id).await?.ok_or_else(|| {
            ProcurementError::Validation(format!(
                "no negotiation found for procurement {procurement_id}"
            ))
            .into()
        })
    }
}

fn stored_winner(
    negotiation: &Negotiation,
    winner_id: &VendorId,
) -> Result<VendorQuote, ProcurementError> {
    negotiation.quote_for(winner_id).cloned().ok_or_else(|| {
        ProcurementError::InvariantViolation(format!(
            "negotiation {} names winner `{}` with no stored quote",
            negotiation.procurement_id, winner_id.0
        ))
    })
}
