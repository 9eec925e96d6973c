use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalArtifact;
use crate::domain::negotiation::VendorQuote;
use crate::errors::ProcurementError;
use crate::workflow::states::WorkflowStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcurementId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Handle for a running workflow, returned by `start` and required by `resume`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl std::fmt::Display for ProcurementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit: String,
    pub specification: Option<String>,
}

impl LineItem {
    /// Substituted when the item extractor returns nothing usable, so the
    /// workflow never proceeds with an empty item set.
    pub fn fallback(description: &str) -> Self {
        Self {
            name: if description.trim().is_empty() {
                "general procurement request".to_string()
            } else {
                description.trim().to_string()
            },
            quantity: 1,
            unit: "unit".to_string(),
            specification: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementRequest {
    pub id: ProcurementId,
    pub org_id: OrgId,
    pub requester_id: UserId,
    pub description: String,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
}

impl ProcurementRequest {
    pub fn validate(&self) -> Result<(), ProcurementError> {
        if self.id.0.trim().is_empty() {
            return Err(ProcurementError::Validation("procurement id must not be empty".into()));
        }
        if self.org_id.0.trim().is_empty() {
            return Err(ProcurementError::Validation("org id must not be empty".into()));
        }
        if self.description.trim().is_empty() && self.items.is_empty() {
            return Err(ProcurementError::Validation(
                "request must carry a description or at least one line item".into(),
            ));
        }
        Ok(())
    }
}

/// Identity of whoever triggers an externally visible operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub org_id: OrgId,
}

impl Actor {
    pub fn may_act_on(&self, request: &ProcurementRequest) -> bool {
        self.org_id == request.org_id && self.user_id == request.requester_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub status: String,
    pub reference_id: String,
}

/// UI artifacts produced by workflow nodes and fanned out to live connections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UiEvent {
    ApprovalCard(ApprovalArtifact),
    StatusUpdate { status: WorkflowStatus, message: String },
}

/// Typed context threaded through every workflow node. Serialized as JSON only
/// at the checkpoint boundary; nodes read and write concrete fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub request: ProcurementRequest,
    pub items: Vec<LineItem>,
    pub inventory_notes: Vec<String>,
    pub quotes: Vec<VendorQuote>,
    pub selected_quote: Option<VendorQuote>,
    pub ui_events: Vec<UiEvent>,
    pub payment: Option<PaymentReceipt>,
}

impl WorkflowContext {
    pub fn for_request(request: ProcurementRequest) -> Self {
        let items = request.items.clone();
        Self {
            request,
            items,
            inventory_notes: Vec::new(),
            quotes: Vec::new(),
            selected_quote: None,
            ui_events: Vec::new(),
            payment: None,
        }
    }

    pub fn push_event(&mut self, event: UiEvent) {
        self.ui_events.push(event);
    }

    pub fn latest_approval_card(&self) -> Option<&ApprovalArtifact> {
        self.ui_events.iter().rev().find_map(|event| match event {
            UiEvent::ApprovalCard(artifact) => Some(artifact),
            UiEvent::StatusUpdate { .. } => None,
        })
    }
}
