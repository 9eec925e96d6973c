//! Session-facing facade over the engine. Every operation passes the entry
//! gate first; the actor identity used for authorization always comes from
//! the admitted session, never from the caller's payload.

use std::sync::Arc;

use procura_core::domain::negotiation::{NegotiationPhase, VendorQuote};
use procura_core::domain::procurement::{LineItem, ProcurementId, ProcurementRequest, ThreadId};
use procura_core::domain::session::{RateLimitClass, SessionId};
use procura_core::errors::ProcurementError;

use crate::gate::EntryGate;
use crate::negotiation::{NegotiationCoordinator, QuoteIntake};
use crate::workflow::{ResumeInput, ResumeOutcome, WorkflowEngine};
use crate::EngineError;

const CANONICAL_ACTIONS: &[&str] = &["approve", "reject", "cancel", "modify", "retry"];

pub struct ProcurementService {
    gate: EntryGate,
    engine: Arc<WorkflowEngine>,
    coordinator: Arc<NegotiationCoordinator>,
}

impl ProcurementService {
    pub fn new(
        gate: EntryGate,
        engine: Arc<WorkflowEngine>,
        coordinator: Arc<NegotiationCoordinator>,
    ) -> Self {
        Self { gate, engine, coordinator }
    }

    pub async fn start_workflow(
        &self,
        session_id: &SessionId,
        request: ProcurementRequest,
    ) -> Result<ThreadId, EngineError> {
        let actor = self.gate.admit(session_id, RateLimitClass::ApiRequests).await?;

        // The request must belong to the session that submits it.
        if actor.user_id != request.requester_id || actor.org_id != request.org_id {
            return Err(ProcurementError::Authorization {
                user: actor.user_id.0,
                org: actor.org_id.0,
            }
            .into());
        }

        self.engine.start(request).await
    }

    /// A canonical action token goes through the closed action set; anything
    /// else is treated as a free-text reply and classified for intent.
    pub async fn resume_workflow(
        &self,
        session_id: &SessionId,
        thread_id: &ThreadId,
        action: &str,
        items: Option<Vec<LineItem>>,
    ) -> Result<ResumeOutcome, EngineError> {
        let actor = self.gate.admit(session_id, RateLimitClass::Messages).await?;

        let token = action.trim().to_ascii_lowercase();
        let input = if CANONICAL_ACTIONS.contains(&token.as_str()) {
            ResumeInput::Action { action: token, items }
        } else {
            ResumeInput::Message(action.to_string())
        };

        self.engine.resume(thread_id, input, &actor).await
    }

    pub async fn process_vendor_quote(
        &self,
        session_id: &SessionId,
        procurement_id: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<QuoteIntake, EngineError> {
        self.gate.admit(session_id, RateLimitClass::ApiRequests).await?;
        self.engine.process_vendor_quote(procurement_id, quote).await
    }

    pub async fn get_negotiation_status(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<NegotiationPhase, EngineError> {
        self.coordinator.status(procurement_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use procura_core::config::RateLimitConfig;
    use procura_core::domain::negotiation::{
        NegotiationPhase, QuoteId, Vendor, VendorId, VendorQuote,
    };
    use procura_core::domain::procurement::{
        LineItem, OrgId, ProcurementId, ProcurementRequest, UserId,
    };
    use procura_core::domain::session::{RateLimitClass, Session, SessionId, SessionStatus};
    use procura_core::errors::ProcurementError;
    use procura_core::workflow::retry::RetryPolicy;
    use procura_store::{
        connect_with_settings, migrations, InMemoryAuditLog, SessionRepository,
        SqlCheckpointRepository, SqlNegotiationRepository, SqlRateLimiter, SqlSessionRepository,
    };

    use super::ProcurementService;
    use crate::broadcast::ConnectionManager;
    use crate::collaborators::{
        AlwaysInStock, RecordingNotifier, StaticOrgDirectory, StaticVendorDirectory,
        StubItemExtractor, StubPaymentGateway,
    };
    use crate::gate::EntryGate;
    use crate::negotiation::NegotiationCoordinator;
    use crate::workflow::{ResumeOutcome, WorkflowEngine};
    use crate::EngineError;

    async fn service() -> ProcurementService {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let sessions = Arc::new(SqlSessionRepository::new(pool.clone()));
        let audit = Arc::new(InMemoryAuditLog::default());
        let coordinator = Arc::new(NegotiationCoordinator::new(
            Arc::new(SqlNegotiationRepository::new(pool.clone())),
            RecordingNotifier::new(),
            audit.clone(),
            Duration::hours(48),
            Duration::hours(12),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            Arc::new(SqlCheckpointRepository::new(pool.clone())),
            coordinator.clone(),
            Arc::new(StaticVendorDirectory::new(vec![Vendor {
                id: VendorId("v0".to_string()),
                name: "Vendor v0".to_string(),
                email: "v0@vendors.example".to_string(),
            }])),
            Arc::new(StubItemExtractor::new(vec![LineItem::fallback("laptops")])),
            Arc::new(AlwaysInStock),
            Arc::new(StubPaymentGateway),
            Arc::new(StaticOrgDirectory::with_orgs(["org-1".to_string()])),
            audit,
            Arc::new(ConnectionManager::unbounded()),
            RetryPolicy { max_retries: 3, base_delay_ms: 1 },
            Duration::hours(168),
        ));
        let gate = EntryGate::new(
            sessions.clone(),
            SqlRateLimiter::new(pool),
            RateLimitConfig {
                api_requests_per_minute: 60,
                messages_per_minute: 20,
                max_connections_per_user: 5,
            },
        );

        let service = ProcurementService::new(gate, engine, coordinator);
        sessions
            .save(&Session {
                id: SessionId("sess-1".to_string()),
                user_id: UserId("user-1".to_string()),
                org_id: OrgId("org-1".to_string()),
                ip_address: None,
                user_agent: None,
                status: SessionStatus::Active,
                expires_at: Utc::now() + Duration::minutes(30),
                api_requests: 0,
                messages_sent: 0,
                created_at: Utc::now(),
            })
            .await
            .expect("seed session");
        service
    }

    fn request(procurement: &str) -> ProcurementRequest {
        ProcurementRequest {
            id: ProcurementId(procurement.to_string()),
            org_id: OrgId("org-1".to_string()),
            requester_id: UserId("user-1".to_string()),
            description: "3 laptops".to_string(),
            items: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn quote(vendor_id: &str, amount: i64) -> VendorQuote {
        VendorQuote {
            vendor_id: VendorId(vendor_id.to_string()),
            quote_id: QuoteId(format!("QT-{vendor_id}")),
            total_amount: Decimal::new(amount, 0),
            currency: "USD".to_string(),
            delivery_time: "1 week".to_string(),
            items: Vec::new(),
            received_at: Utc::now(),
            valid_until: None,
        }
    }

    #[tokio::test]
    async fn start_requires_an_active_session() {
        let service = service().await;
        let error = service
            .start_workflow(&SessionId("missing".to_string()), request("PR-1"))
            .await
            .expect_err("no session");
        assert!(error.to_string().contains("not active"));
    }

    #[tokio::test]
    async fn foreign_request_is_refused_even_with_a_valid_session() {
        let service = service().await;
        let mut foreign = request("PR-1");
        foreign.requester_id = UserId("someone-else".to_string());

        let error = service
            .start_workflow(&SessionId("sess-1".to_string()), foreign)
            .await
            .expect_err("not the session's request");
        assert!(matches!(
            error,
            EngineError::Domain(ProcurementError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn full_round_trip_through_the_facade() {
        let service = service().await;
        let session = SessionId("sess-1".to_string());

        let thread_id =
            service.start_workflow(&session, request("PR-1")).await.expect("start");
        assert_eq!(
            service
                .get_negotiation_status(&ProcurementId("PR-1".to_string()))
                .await
                .expect("status"),
            NegotiationPhase::AwaitingQuotes
        );

        service
            .process_vendor_quote(&session, &ProcurementId("PR-1".to_string()), &quote("v0", 500))
            .await
            .expect("quote");

        // Free text first: no decision, nothing moves.
        let waiting = service
            .resume_workflow(&session, &thread_id, "when does it arrive?", None)
            .await
            .expect("free text");
        assert_eq!(waiting, ResumeOutcome::Waiting);

        let outcome = service
            .resume_workflow(&session, &thread_id, "approve", None)
            .await
            .expect("approve");
        assert!(matches!(outcome, ResumeOutcome::Completed { .. }));
    }
}
