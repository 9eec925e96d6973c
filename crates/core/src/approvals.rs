//! Approval-intent classification and artifact construction for the human
//! suspension point.

use rust_decimal::Decimal;

use crate::domain::approval::{ApprovalArtifact, ApprovalDecision};
use crate::domain::negotiation::VendorQuote;
use crate::domain::procurement::OrgId;

const APPROVE_TOKENS: &[&str] =
    &["approve", "approved", "yes", "ok", "okay", "accept", "lgtm", "👍"];
const REJECT_TOKENS: &[&str] =
    &["reject", "rejected", "no", "deny", "denied", "decline", "declined", "👎"];

/// Inspects an inbound free-text reply for approval or rejection intent.
/// Anything unrecognized yields `Waiting`: the workflow stays suspended and
/// nothing is mutated.
pub fn classify_reply(text: &str) -> ApprovalDecision {
    for word in text.split_whitespace() {
        let token = word
            .trim_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        if APPROVE_TOKENS.contains(&token.as_str()) {
            return ApprovalDecision::Approved;
        }
        if REJECT_TOKENS.contains(&token.as_str()) {
            return ApprovalDecision::Rejected;
        }
    }
    ApprovalDecision::Waiting
}

/// Builds the immutable approval artifact for a finalized winner. Savings are
/// quoted against the highest received offer; with a single quote the savings
/// are zero.
pub fn build_artifact(
    winner: &VendorQuote,
    vendor_name: &str,
    all_quotes: &[VendorQuote],
    org_id: &OrgId,
) -> ApprovalArtifact {
    let highest = all_quotes
        .iter()
        .map(|quote| quote.total_amount)
        .max()
        .unwrap_or(winner.total_amount);

    let savings_percentage = if highest > Decimal::ZERO && highest > winner.total_amount {
        ((highest - winner.total_amount) / highest * Decimal::new(100, 0)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    ApprovalArtifact {
        vendor_name: vendor_name.to_string(),
        total_amount: winner.total_amount,
        currency: winner.currency.clone(),
        items: winner.items.clone(),
        delivery_time: winner.delivery_time.clone(),
        savings_percentage,
        quote_id: winner.quote_id.clone(),
        org_id: org_id.clone(),
    }
}
