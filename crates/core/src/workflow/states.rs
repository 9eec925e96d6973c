use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed workflow state graph. Terminals are Completed, Rejected, Error
/// and Timeout; Error and Timeout are reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Analyzing,
    InventoryCheck,
    FetchingQuotes,
    ApprovalPending,
    WaitingApproval,
    Paid,
    Completed,
    Rejected,
    Error,
    Timeout,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Error | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::InventoryCheck => "inventory_check",
            Self::FetchingQuotes => "fetching_quotes",
            Self::ApprovalPending => "approval_pending",
            Self::WaitingApproval => "waiting_approval",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "analyzing" => Self::Analyzing,
            "inventory_check" => Self::InventoryCheck,
            "fetching_quotes" => Self::FetchingQuotes,
            "approval_pending" => Self::ApprovalPending,
            "waiting_approval" => Self::WaitingApproval,
            "paid" => Self::Paid,
            "completed" => Self::Completed,
            "rejected" => Self::Rejected,
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    IntakeAccepted,
    ItemsExtracted,
    InventoryConfirmed,
    QuotesFinalized,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    QuotesModified,
    CancelRequested,
    PaymentSettled,
    FailureExhausted,
    TimedOut,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WorkflowStatus, event: WorkflowEvent },
}

/// The closed, compile-time-checked transition table. Every edge the engine
/// may take is named here; an event that does not apply to the current state
/// is rejected rather than silently ignored.
pub fn transition(
    current: WorkflowStatus,
    event: &WorkflowEvent,
) -> Result<WorkflowStatus, TransitionError> {
    use WorkflowEvent::{
        ApprovalDenied, ApprovalGranted, ApprovalRequested, CancelRequested, FailureExhausted,
        IntakeAccepted, InventoryConfirmed, ItemsExtracted, PaymentSettled, QuotesFinalized,
        QuotesModified, TimedOut,
    };
    use WorkflowStatus::{
        Analyzing, ApprovalPending, Error, FetchingQuotes, InventoryCheck, Paid, Pending, Rejected,
        Timeout, WaitingApproval,
    };

    let next = match (current, event) {
        (Pending, IntakeAccepted) => Analyzing,
        (Analyzing, ItemsExtracted) => InventoryCheck,
        (InventoryCheck, InventoryConfirmed) => FetchingQuotes,
        (FetchingQuotes, QuotesFinalized) => ApprovalPending,
        (ApprovalPending, ApprovalRequested) => WaitingApproval,
        (WaitingApproval, ApprovalGranted) => Paid,
        (WaitingApproval, ApprovalDenied) => Rejected,
        (WaitingApproval, QuotesModified) => FetchingQuotes,
        (Paid, PaymentSettled) => WorkflowStatus::Completed,
        // Cancellation is honored anywhere before payment.
        (state, CancelRequested) if !state.is_terminal() && state != Paid => Rejected,
        (state, FailureExhausted) if !state.is_terminal() => Error,
        (state, TimedOut) if !state.is_terminal() => Timeout,
        (state, event) => {
            return Err(TransitionError::InvalidTransition { state, event: event.clone() });
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::{transition, TransitionError, WorkflowEvent, WorkflowStatus};

    #[test]
    fn happy_path_reaches_completed() {
        let steps = [
            WorkflowEvent::IntakeAccepted,
            WorkflowEvent::ItemsExtracted,
            WorkflowEvent::InventoryConfirmed,
            WorkflowEvent::QuotesFinalized,
            WorkflowEvent::ApprovalRequested,
            WorkflowEvent::ApprovalGranted,
            WorkflowEvent::PaymentSettled,
        ];

        let mut state = WorkflowStatus::Pending;
        for event in &steps {
            state = transition(state, event).expect("edge should be in the table");
        }
        assert_eq!(state, WorkflowStatus::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn rejection_and_modify_branch_from_waiting_approval() {
        let rejected =
            transition(WorkflowStatus::WaitingApproval, &WorkflowEvent::ApprovalDenied)
                .expect("denial edge");
        assert_eq!(rejected, WorkflowStatus::Rejected);

        let refetch =
            transition(WorkflowStatus::WaitingApproval, &WorkflowEvent::QuotesModified)
                .expect("modify edge");
        assert_eq!(refetch, WorkflowStatus::FetchingQuotes);
    }

    #[test]
    fn error_and_timeout_reachable_from_any_non_terminal() {
        for state in [
            WorkflowStatus::Pending,
            WorkflowStatus::Analyzing,
            WorkflowStatus::FetchingQuotes,
            WorkflowStatus::WaitingApproval,
            WorkflowStatus::Paid,
        ] {
            assert_eq!(
                transition(state, &WorkflowEvent::FailureExhausted).expect("error edge"),
                WorkflowStatus::Error
            );
            assert_eq!(
                transition(state, &WorkflowEvent::TimedOut).expect("timeout edge"),
                WorkflowStatus::Timeout
            );
        }
    }

    #[test]
    fn cancel_is_rejected_once_paid() {
        let error = transition(WorkflowStatus::Paid, &WorkflowEvent::CancelRequested)
            .expect_err("cancel after payment must fail");
        assert!(matches!(error, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_states_accept_no_events() {
        for state in [
            WorkflowStatus::Completed,
            WorkflowStatus::Rejected,
            WorkflowStatus::Error,
            WorkflowStatus::Timeout,
        ] {
            assert!(transition(state, &WorkflowEvent::ApprovalGranted).is_err());
            assert!(transition(state, &WorkflowEvent::CancelRequested).is_err());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for state in [
            WorkflowStatus::Pending,
            WorkflowStatus::InventoryCheck,
            WorkflowStatus::WaitingApproval,
            WorkflowStatus::Timeout,
        ] {
            assert_eq!(WorkflowStatus::parse(state.as_str()), Some(state));
        }
        assert_eq!(WorkflowStatus::parse("bogus"), None);
    }
}
