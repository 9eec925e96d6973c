pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod negotiation;
pub mod workflow;

pub use approvals::{build_artifact, classify_reply};
pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
pub use domain::approval::{ApprovalArtifact, ApprovalDecision, ResumeAction};
pub use domain::negotiation::{
    Negotiation, NegotiationPhase, QuoteId, Vendor, VendorId, VendorQuote,
};
pub use domain::procurement::{
    Actor, LineItem, OrgId, PaymentReceipt, ProcurementId, ProcurementRequest, ThreadId, UiEvent,
    UserId, WorkflowContext,
};
pub use domain::session::{RateLimitClass, RateLimitDecision, Session, SessionId, SessionStatus};
pub use errors::ProcurementError;
pub use negotiation::{classify, reminder_due, select_winner};
pub use workflow::retry::RetryPolicy;
pub use workflow::states::{TransitionError, WorkflowEvent, WorkflowStatus};
