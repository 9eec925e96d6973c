//! Outbound adapters wired at bootstrap. Real vendor email, payment and
//! directory integrations live behind the engine's collaborator traits;
//! these implementations log the outbound side and keep the workflow moving
//! so the binary runs end to end without external credentials.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use procura_core::domain::negotiation::{Vendor, VendorId, VendorQuote};
use procura_core::domain::procurement::{LineItem, OrgId, PaymentReceipt, ProcurementId};
use procura_core::errors::ProcurementError;
use procura_engine::{ItemExtractor, Notifier, OrgDirectory, PaymentGateway};

/// Emits RFQs and reminders to the log instead of the wire. Every delivery
/// reports success.
pub struct LoggingNotifier {
    from_address: String,
}

impl LoggingNotifier {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self { from_address: from_address.into() }
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_rfq(
        &self,
        vendor: &Vendor,
        procurement_id: &ProcurementId,
        items: &[LineItem],
    ) -> bool {
        info!(
            event_name = "rfq_dispatched",
            procurement_id = %procurement_id,
            vendor_id = %vendor.id.0,
            vendor_email = %vendor.email,
            from_address = %self.from_address,
            item_count = items.len(),
        );
        true
    }

    async fn send_reminder(&self, vendor: &Vendor, procurement_id: &ProcurementId) -> bool {
        info!(
            event_name = "reminder_dispatched",
            procurement_id = %procurement_id,
            vendor_id = %vendor.id.0,
            vendor_email = %vendor.email,
            from_address = %self.from_address,
        );
        true
    }
}

/// Splits a free-text request into line items on commas and "and", reading a
/// leading count as the quantity. Finding nothing is fine; the engine
/// substitutes a fallback item.
#[derive(Clone, Default)]
pub struct HeuristicItemExtractor;

#[async_trait]
impl ItemExtractor for HeuristicItemExtractor {
    async fn extract(&self, description: &str) -> Result<Vec<LineItem>, ProcurementError> {
        let mut items = Vec::new();

        for segment in description.split(',').flat_map(|part| part.split(" and ")) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let mut words = segment.split_whitespace();
            let first = match words.next() {
                Some(word) => word,
                None => continue,
            };

            let (quantity, name) = match first.parse::<u32>() {
                Ok(count) if count > 0 => {
                    let rest = words.collect::<Vec<_>>().join(" ");
                    (count, rest)
                }
                _ => (1, segment.to_string()),
            };
            if name.is_empty() {
                continue;
            }

            items.push(LineItem {
                name,
                quantity,
                unit: "unit".to_string(),
                specification: None,
            });
        }

        Ok(items)
    }
}

/// Settles every charge locally and logs the reference. The receipt shape
/// matches what a real gateway adapter would return.
pub struct LoggingPaymentGateway {
    currency: String,
}

impl LoggingPaymentGateway {
    pub fn new(currency: impl Into<String>) -> Self {
        Self { currency: currency.into() }
    }
}

#[async_trait]
impl PaymentGateway for LoggingPaymentGateway {
    async fn charge(
        &self,
        procurement_id: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<PaymentReceipt, ProcurementError> {
        let reference_id = format!("pay-{}", Uuid::new_v4());
        info!(
            event_name = "payment_settled",
            procurement_id = %procurement_id,
            vendor_id = %quote.vendor_id.0,
            amount = %quote.total_amount,
            currency = %self.currency,
            reference_id = %reference_id,
        );
        Ok(PaymentReceipt { status: "settled".to_string(), reference_id })
    }
}

/// Accepts any non-empty org id. A directory-service adapter replaces this
/// once org provisioning exists.
#[derive(Clone, Default)]
pub struct OpenOrgDirectory;

#[async_trait]
impl OrgDirectory for OpenOrgDirectory {
    async fn org_exists(&self, org_id: &OrgId) -> Result<bool, ProcurementError> {
        Ok(!org_id.0.trim().is_empty())
    }
}

/// Fixed roster used until a vendor directory integration is wired in.
pub fn seed_vendors() -> Vec<Vendor> {
    [
        ("acme-supplies", "Acme Supplies", "quotes@acme-supplies.example"),
        ("globex-office", "Globex Office", "rfq@globex-office.example"),
        ("initech-hardware", "Initech Hardware", "sales@initech-hardware.example"),
    ]
    .into_iter()
    .map(|(id, name, email)| Vendor {
        id: VendorId(id.to_string()),
        name: name.to_string(),
        email: email.to_string(),
    })
    .collect()
}
