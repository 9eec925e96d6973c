use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::negotiation::QuoteId;
use crate::domain::procurement::{LineItem, OrgId};
use crate::errors::ProcurementError;

/// Everything a human needs to decide on a winning quote without re-querying
/// the system. Immutable once emitted; the decision itself is derived from
/// the next inbound action and never stored here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalArtifact {
    pub vendor_name: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub items: Vec<LineItem>,
    pub delivery_time: String,
    pub savings_percentage: Decimal,
    pub quote_id: QuoteId,
    pub org_id: OrgId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Waiting,
}

/// The closed set of resumption actions accepted from a suspended workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    Approve,
    Reject,
    Cancel,
    Modify { items: Vec<LineItem> },
    Retry,
}

impl ResumeAction {
    /// Parses a canonical action token plus optional accompanying data.
    /// `modify` without non-empty data is a validation failure, as is any
    /// token outside the closed set.
    pub fn from_parts(
        action: &str,
        items: Option<Vec<LineItem>>,
    ) -> Result<Self, ProcurementError> {
        match action.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "cancel" => Ok(Self::Cancel),
            "retry" => Ok(Self::Retry),
            "modify" => {
                let items = items.unwrap_or_default();
                if items.is_empty() {
                    return Err(ProcurementError::Validation(
                        "modify requires a non-empty item set".into(),
                    ));
                }
                Ok(Self::Modify { items })
            }
            other => Err(ProcurementError::Validation(format!(
                "unsupported resume action `{other}` (expected approve|reject|cancel|modify|retry)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ResumeAction;
    use crate::domain::procurement::LineItem;
    use crate::errors::ProcurementError;

    #[test]
    fn canonical_tokens_parse_case_insensitively() {
        assert_eq!(ResumeAction::from_parts("Approve", None).expect("approve"), ResumeAction::Approve);
        assert_eq!(ResumeAction::from_parts("REJECT", None).expect("reject"), ResumeAction::Reject);
        assert_eq!(ResumeAction::from_parts("cancel", None).expect("cancel"), ResumeAction::Cancel);
        assert_eq!(ResumeAction::from_parts("retry", None).expect("retry"), ResumeAction::Retry);
    }

    #[test]
    fn modify_requires_items() {
        let error = ResumeAction::from_parts("modify", None).expect_err("no items");
        assert!(matches!(error, ProcurementError::Validation(_)));

        let parsed = ResumeAction::from_parts("modify", Some(vec![LineItem::fallback("desks")]))
            .expect("modify with items");
        assert!(matches!(parsed, ResumeAction::Modify { .. }));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let error = ResumeAction::from_parts("escalate", None).expect_err("unknown token");
        assert!(error.to_string().contains("unsupported resume action"));
    }
}
