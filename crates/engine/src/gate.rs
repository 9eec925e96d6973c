//! The entry gate every externally triggered operation passes through:
//! session validation, then the fixed-window rate limit, then the session
//! activity counter. Ordering matters; an invalid session never consumes
//! rate-limit budget.

use std::sync::Arc;

use chrono::Utc;

use procura_core::config::RateLimitConfig;
use procura_core::domain::procurement::Actor;
use procura_core::domain::session::{RateLimitClass, Session, SessionId};
use procura_core::errors::ProcurementError;
use procura_store::{SessionRepository, SqlRateLimiter};

use crate::EngineError;

const WINDOW_SECONDS: u64 = 60;

pub struct EntryGate {
    sessions: Arc<dyn SessionRepository>,
    limiter: SqlRateLimiter,
    limits: RateLimitConfig,
}

impl EntryGate {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        limiter: SqlRateLimiter,
        limits: RateLimitConfig,
    ) -> Self {
        Self { sessions, limiter, limits }
    }

    /// Admits one operation for the session or says why not. On success the
    /// caller gets the session's actor identity for authorization downstream.
    pub async fn admit(
        &self,
        session_id: &SessionId,
        class: RateLimitClass,
    ) -> Result<Actor, EngineError> {
        let now = Utc::now();
        let session = self
            .sessions
            .find_valid(session_id, now)
            .await?
            .ok_or_else(|| EngineError::validation("session is not active"))?;

        let max = match class {
            RateLimitClass::ApiRequests => self.limits.api_requests_per_minute,
            RateLimitClass::Messages => self.limits.messages_per_minute,
        };

        let decision =
            self.limiter.check(&session.user_id.0, class, max, WINDOW_SECONDS, now).await?;
        if !decision.allowed {
            return Err(ProcurementError::RateLimited {
                retry_after_seconds: decision.retry_after.unwrap_or(WINDOW_SECONDS),
            }
            .into());
        }

        self.sessions.record_activity(session_id, class).await?;

        Ok(Actor { user_id: session.user_id, org_id: session.org_id })
    }

    pub async fn session(&self, session_id: &SessionId) -> Result<Option<Session>, EngineError> {
        Ok(self.sessions.find_valid(session_id, Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use procura_core::config::RateLimitConfig;
    use procura_core::domain::procurement::{OrgId, UserId};
    use procura_core::domain::session::{RateLimitClass, Session, SessionId, SessionStatus};
    use procura_core::errors::ProcurementError;
    use procura_store::{
        connect_with_settings, migrations, SessionRepository, SqlRateLimiter,
        SqlSessionRepository,
    };

    use super::EntryGate;
    use crate::EngineError;

    fn session(id: &str, ttl_minutes: i64) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId(id.to_string()),
            user_id: UserId("user-1".to_string()),
            org_id: OrgId("org-1".to_string()),
            ip_address: None,
            user_agent: None,
            status: SessionStatus::Active,
            expires_at: now + Duration::minutes(ttl_minutes),
            api_requests: 0,
            messages_sent: 0,
            created_at: now,
        }
    }

    async fn gate_with_limits(api: u32, messages: u32) -> (EntryGate, Arc<SqlSessionRepository>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let sessions = Arc::new(SqlSessionRepository::new(pool.clone()));
        let gate = EntryGate::new(
            sessions.clone(),
            SqlRateLimiter::new(pool),
            RateLimitConfig {
                api_requests_per_minute: api,
                messages_per_minute: messages,
                max_connections_per_user: 5,
            },
        );
        (gate, sessions)
    }

    #[tokio::test]
    async fn valid_session_is_admitted_and_counted() {
        let (gate, sessions) = gate_with_limits(10, 10).await;
        let id = SessionId("sess-1".to_string());
        sessions.save(&session("sess-1", 30)).await.expect("save");

        let actor = gate.admit(&id, RateLimitClass::ApiRequests).await.expect("admit");
        assert_eq!(actor.user_id.0, "user-1");

        let found =
            sessions.find_valid(&id, Utc::now()).await.expect("find").expect("present");
        assert_eq!(found.api_requests, 1);
    }

    #[tokio::test]
    async fn unknown_session_is_refused() {
        let (gate, _sessions) = gate_with_limits(10, 10).await;
        let error = gate
            .admit(&SessionId("missing".to_string()), RateLimitClass::ApiRequests)
            .await
            .expect_err("no session");
        assert!(error.to_string().contains("not active"));
    }

    #[tokio::test]
    async fn expired_session_is_refused() {
        let (gate, sessions) = gate_with_limits(10, 10).await;
        sessions.save(&session("sess-old", -5)).await.expect("save");

        let error = gate
            .admit(&SessionId("sess-old".to_string()), RateLimitClass::ApiRequests)
            .await
            .expect_err("expired");
        assert!(error.to_string().contains("not active"));
    }

    #[tokio::test]
    async fn limit_overflow_reports_retry_after() {
        let (gate, sessions) = gate_with_limits(2, 10).await;
        let id = SessionId("sess-1".to_string());
        sessions.save(&session("sess-1", 30)).await.expect("save");

        gate.admit(&id, RateLimitClass::ApiRequests).await.expect("first");
        gate.admit(&id, RateLimitClass::ApiRequests).await.expect("second");

        let error =
            gate.admit(&id, RateLimitClass::ApiRequests).await.expect_err("over the limit");
        match error {
            EngineError::Domain(ProcurementError::RateLimited { retry_after_seconds }) => {
                assert!(retry_after_seconds <= 60);
            }
            other => panic!("expected rate limit, got {other}"),
        }

        // A refused call does not bump the activity counter.
        let found =
            sessions.find_valid(&id, Utc::now()).await.expect("find").expect("present");
        assert_eq!(found.api_requests, 2);
    }

    #[tokio::test]
    async fn message_class_has_its_own_budget() {
        let (gate, sessions) = gate_with_limits(1, 2).await;
        let id = SessionId("sess-1".to_string());
        sessions.save(&session("sess-1", 30)).await.expect("save");

        gate.admit(&id, RateLimitClass::ApiRequests).await.expect("api budget");
        gate.admit(&id, RateLimitClass::Messages).await.expect("message budget");
        gate.admit(&id, RateLimitClass::Messages).await.expect("second message");

        let error =
            gate.admit(&id, RateLimitClass::Messages).await.expect_err("messages exhausted");
        assert!(matches!(error, EngineError::Domain(ProcurementError::RateLimited { .. })));
    }
}
