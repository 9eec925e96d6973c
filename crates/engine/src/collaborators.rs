//! Seams to the outside world. Vendor contact, item extraction, inventory,
//! payment and org lookup all live behind traits; production adapters are
//! wired in the server, tests use the in-memory doubles below.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use procura_core::domain::negotiation::{Vendor, VendorQuote};
use procura_core::domain::procurement::{LineItem, OrgId, PaymentReceipt, ProcurementId};
use procura_core::errors::ProcurementError;

#[async_trait]
pub trait VendorDirectory: Send + Sync {
    async fn vendors_for(
        &self,
        org_id: &OrgId,
        items: &[LineItem],
    ) -> Result<Vec<Vendor>, ProcurementError>;
}

#[async_trait]
pub trait ItemExtractor: Send + Sync {
    /// May legitimately return an empty list; the engine substitutes a
    /// fallback item rather than failing.
    async fn extract(&self, description: &str) -> Result<Vec<LineItem>, ProcurementError>;
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn check(&self, items: &[LineItem]) -> Result<Vec<String>, ProcurementError>;
}

/// Outbound vendor messaging. Delivery failures are reported, not thrown;
/// a partial fan-out still proceeds.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_rfq(
        &self,
        vendor: &Vendor,
        procurement_id: &ProcurementId,
        items: &[LineItem],
    ) -> bool;

    async fn send_reminder(&self, vendor: &Vendor, procurement_id: &ProcurementId) -> bool;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        procurement_id: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<PaymentReceipt, ProcurementError>;
}

#[async_trait]
pub trait OrgDirectory: Send + Sync {
    async fn org_exists(&self, org_id: &OrgId) -> Result<bool, ProcurementError>;
}

#[derive(Clone, Default)]
pub struct StaticVendorDirectory {
    vendors: Vec<Vendor>,
}

impl StaticVendorDirectory {
    pub fn new(vendors: Vec<Vendor>) -> Self {
        Self { vendors }
    }
}

#[async_trait]
impl VendorDirectory for StaticVendorDirectory {
    async fn vendors_for(
        &self,
        _org_id: &OrgId,
        _items: &[LineItem],
    ) -> Result<Vec<Vendor>, ProcurementError> {
        Ok(self.vendors.clone())
    }
}

/// Returns a fixed item list after an optional number of transient failures,
/// for exercising the retry path.
pub struct StubItemExtractor {
    items: Vec<LineItem>,
    failures_remaining: AtomicU32,
}

impl StubItemExtractor {
    pub fn new(items: Vec<LineItem>) -> Self {
        Self { items, failures_remaining: AtomicU32::new(0) }
    }

    pub fn failing_first(items: Vec<LineItem>, failures: u32) -> Self {
        Self { items, failures_remaining: AtomicU32::new(failures) }
    }
}

#[async_trait]
impl ItemExtractor for StubItemExtractor {
    async fn extract(&self, _description: &str) -> Result<Vec<LineItem>, ProcurementError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ProcurementError::TransientIo("extractor unavailable".into()));
        }
        Ok(self.items.clone())
    }
}

#[derive(Clone, Default)]
pub struct AlwaysInStock;

#[async_trait]
impl InventoryService for AlwaysInStock {
    async fn check(&self, items: &[LineItem]) -> Result<Vec<String>, ProcurementError> {
        Ok(items.iter().map(|item| format!("{}: not held in stock", item.name)).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Rfq { vendor_id: String, procurement_id: String },
    Reminder { vendor_id: String, procurement_id: String },
}

/// Records every outbound message; vendors listed in `failing` report
/// delivery failure.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_for(vendor_ids: impl IntoIterator<Item = String>) -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), failing: vendor_ids.into_iter().collect() })
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, message: SentMessage) {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_rfq(
        &self,
        vendor: &Vendor,
        procurement_id: &ProcurementId,
        _items: &[LineItem],
    ) -> bool {
        self.record(SentMessage::Rfq {
            vendor_id: vendor.id.0.clone(),
            procurement_id: procurement_id.0.clone(),
        });
        !self.failing.contains(&vendor.id.0)
    }

    async fn send_reminder(&self, vendor: &Vendor, procurement_id: &ProcurementId) -> bool {
        self.record(SentMessage::Reminder {
            vendor_id: vendor.id.0.clone(),
            procurement_id: procurement_id.0.clone(),
        });
        !self.failing.contains(&vendor.id.0)
    }
}

#[derive(Clone, Default)]
pub struct StubPaymentGateway;

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn charge(
        &self,
        procurement_id: &ProcurementId,
        _quote: &VendorQuote,
    ) -> Result<PaymentReceipt, ProcurementError> {
        Ok(PaymentReceipt {
            status: "settled".to_string(),
            reference_id: format!("pay-{}", procurement_id.0),
        })
    }
}

#[derive(Clone, Default)]
pub struct StaticOrgDirectory {
    orgs: HashSet<String>,
}

impl StaticOrgDirectory {
    pub fn with_orgs(org_ids: impl IntoIterator<Item = String>) -> Self {
        Self { orgs: org_ids.into_iter().collect() }
    }
}

#[async_trait]
impl OrgDirectory for StaticOrgDirectory {
    async fn org_exists(&self, org_id: &OrgId) -> Result<bool, ProcurementError> {
        Ok(self.orgs.contains(&org_id.0))
    }
}
