//! Pure negotiation logic: phase classification, winner selection, and the
//! reminder cadence predicate. All time-dependent decisions take `now` as a
//! parameter so they stay deterministic under test.

use chrono::{DateTime, Duration, Utc};

use crate::domain::negotiation::{Negotiation, NegotiationPhase, VendorQuote};

/// Derives the observable phase of a negotiation. Deadline passage takes
/// precedence over completeness: a negotiation whose vendors all responded
/// after the deadline is still `DeadlinePassed` until someone finalizes it.
pub fn classify(negotiation: &Negotiation, now: DateTime<Utc>) -> NegotiationPhase {
    if negotiation.cancelled {
        return NegotiationPhase::Cancelled;
    }
    if negotiation.finalized_at.is_some() {
        return NegotiationPhase::Finalized;
    }
    if now > negotiation.deadline {
        return NegotiationPhase::DeadlinePassed;
    }

    let responded = negotiation.vendors_responded();
    if responded == 0 {
        NegotiationPhase::AwaitingQuotes
    } else if responded < negotiation.vendors_contacted {
        NegotiationPhase::ReceivingQuotes
    } else {
        NegotiationPhase::QuotesComplete
    }
}

/// Minimum `total_amount` wins; ties break to the earliest `received_at`.
pub fn select_winner(quotes: &[VendorQuote]) -> Option<&VendorQuote> {
    quotes.iter().min_by(|a, b| {
        a.total_amount.cmp(&b.total_amount).then_with(|| a.received_at.cmp(&b.received_at))
    })
}

/// A reminder is due when the negotiation is still open, the deadline has not
/// passed, and the cadence has elapsed since the last reminder (or since
/// initiation when none has been sent yet).
pub fn reminder_due(negotiation: &Negotiation, now: DateTime<Utc>, cadence: Duration) -> bool {
    if negotiation.cancelled || negotiation.finalized_at.is_some() || now > negotiation.deadline {
        return false;
    }
    let reference = negotiation.last_reminder_sent.unwrap_or(negotiation.initiated_at);
    now - reference >= cadence
}
