use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::procurement::{LineItem, ProcurementId};
use crate::errors::ProcurementError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VendorId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VendorQuote {
    pub vendor_id: VendorId,
    pub quote_id: QuoteId,
    pub total_amount: Decimal,
    pub currency: String,
    pub delivery_time: String,
    pub items: Vec<LineItem>,
    pub received_at: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// One bounded multi-vendor quote-collection round, 1:1 with a procurement
/// request in its quoting phase. `quotes` holds at most one entry per vendor;
/// a resubmission replaces the earlier quote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    pub procurement_id: ProcurementId,
    pub vendors: Vec<Vendor>,
    pub vendors_contacted: u32,
    pub quotes: Vec<VendorQuote>,
    pub deadline: DateTime<Utc>,
    pub initiated_at: DateTime<Utc>,
    pub last_reminder_sent: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub winner_vendor_id: Option<VendorId>,
    pub cancelled: bool,
}

impl Negotiation {
    pub fn open(
        procurement_id: ProcurementId,
        vendors: Vec<Vendor>,
        deadline: DateTime<Utc>,
        initiated_at: DateTime<Utc>,
    ) -> Self {
        let vendors_contacted = vendors.len() as u32;
        Self {
            procurement_id,
            vendors,
            vendors_contacted,
            quotes: Vec::new(),
            deadline,
            initiated_at,
            last_reminder_sent: None,
            finalized_at: None,
            winner_vendor_id: None,
            cancelled: false,
        }
    }

    /// Always derived from the quotes map cardinality, never counted blindly.
    pub fn vendors_responded(&self) -> u32 {
        self.quotes.len() as u32
    }

    pub fn quote_for(&self, vendor_id: &VendorId) -> Option<&VendorQuote> {
        self.quotes.iter().find(|quote| &quote.vendor_id == vendor_id)
    }

    pub fn non_responders(&self) -> Vec<&Vendor> {
        self.vendors
            .iter()
            .filter(|vendor| self.quote_for(&vendor.id).is_none())
            .collect()
    }

    pub fn check_invariants(&self) -> Result<(), ProcurementError> {
        if self.vendors_responded() > self.vendors_contacted {
            return Err(ProcurementError::InvariantViolation(format!(
                "negotiation {}: {} responses exceed {} contacted vendors",
                self.procurement_id,
                self.vendors_responded(),
                self.vendors_contacted
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationPhase {
    AwaitingQuotes,
    ReceivingQuotes,
    QuotesComplete,
    DeadlinePassed,
    Finalized,
    Cancelled,
}

impl NegotiationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingQuotes => "awaiting_quotes",
            Self::ReceivingQuotes => "receiving_quotes",
            Self::QuotesComplete => "quotes_complete",
            Self::DeadlinePassed => "deadline_passed",
            Self::Finalized => "finalized",
            Self::Cancelled => "cancelled",
        }
    }
}
