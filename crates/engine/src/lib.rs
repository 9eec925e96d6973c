pub mod broadcast;
pub mod collaborators;
pub mod gate;
pub mod negotiation;
pub mod scheduler;
pub mod service;
pub mod workflow;

pub use broadcast::{BroadcastReport, ConnectionId, ConnectionManager};
pub use collaborators::{
    AlwaysInStock, InventoryService, ItemExtractor, Notifier, OrgDirectory, PaymentGateway,
    RecordingNotifier, SentMessage, StaticOrgDirectory, StaticVendorDirectory, StubItemExtractor,
    StubPaymentGateway, VendorDirectory,
};
pub use gate::EntryGate;
pub use negotiation::{InitiationReport, NegotiationCoordinator, QuoteIntake, ReminderReport};
pub use scheduler::{SweepSummary, Sweeper};
pub use service::ProcurementService;
pub use workflow::{DeadlineReport, ResumeInput, ResumeOutcome, WorkflowEngine};

use thiserror::Error;

use procura_core::errors::ProcurementError;
use procura_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] ProcurementError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Domain(ProcurementError::Validation(message.into()))
    }
}
