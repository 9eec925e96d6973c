use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use procura_core::domain::procurement::{OrgId, UserId};
use procura_core::domain::session::{RateLimitClass, Session, SessionId, SessionStatus};

use crate::{DbPool, StoreError};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Unknown, expired and revoked sessions all come back as `None`; an
    /// expired row is flipped to `expired` on the way out.
    async fn find_valid(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Single-round-trip activity counter bump.
    async fn record_activity(
        &self,
        id: &SessionId,
        class: RateLimitClass,
    ) -> Result<(), StoreError>;

    async fn revoke(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Marks every overdue active session expired; returns how many flipped.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Decode(format!("bad {column} timestamp `{value}`: {err}")))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
    let session_id: String =
        row.try_get("session_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let user_id: String = row.try_get("user_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let org_id: String = row.try_get("org_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let ip_address: Option<String> =
        row.try_get("ip_address").map_err(|e| StoreError::Decode(e.to_string()))?;
    let user_agent: Option<String> =
        row.try_get("user_agent").map_err(|e| StoreError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| StoreError::Decode(e.to_string()))?;
    let expires_at_str: String =
        row.try_get("expires_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    let api_requests: i64 =
        row.try_get("api_requests").map_err(|e| StoreError::Decode(e.to_string()))?;
    let messages_sent: i64 =
        row.try_get("messages_sent").map_err(|e| StoreError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| StoreError::Decode(e.to_string()))?;

    Ok(Session {
        id: SessionId(session_id),
        user_id: UserId(user_id),
        org_id: OrgId(org_id),
        ip_address,
        user_agent,
        status: SessionStatus::parse(&status_str),
        expires_at: parse_timestamp(&expires_at_str, "expires_at")?,
        api_requests: api_requests.max(0) as u64,
        messages_sent: messages_sent.max(0) as u64,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO session (session_id, user_id, org_id, ip_address, user_agent, status,
                                  expires_at, api_requests, messages_sent, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 status = excluded.status,
                 expires_at = excluded.expires_at,
                 api_requests = excluded.api_requests,
                 messages_sent = excluded.messages_sent",
        )
        .bind(&session.id.0)
        .bind(&session.user_id.0)
        .bind(&session.org_id.0)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.status.as_str())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.api_requests as i64)
        .bind(session.messages_sent as i64)
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_valid(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, user_id, org_id, ip_address, user_agent, status, expires_at,
                    api_requests, messages_sent, created_at
             FROM session WHERE session_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let session = match row {
            Some(ref r) => row_to_session(r)?,
            None => return Ok(None),
        };

        if session.is_active(now) {
            return Ok(Some(session));
        }

        if session.status == SessionStatus::Active {
            sqlx::query("UPDATE session SET status = 'expired' WHERE session_id = ?")
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
        }

        Ok(None)
    }

    async fn record_activity(
        &self,
        id: &SessionId,
        class: RateLimitClass,
    ) -> Result<(), StoreError> {
        let sql = match class {
            RateLimitClass::ApiRequests => {
                "UPDATE session SET api_requests = api_requests + 1 WHERE session_id = ?"
            }
            RateLimitClass::Messages => {
                "UPDATE session SET messages_sent = messages_sent + 1 WHERE session_id = ?"
            }
        };
        sqlx::query(sql).bind(&id.0).execute(&self.pool).await?;
        Ok(())
    }

    async fn revoke(&self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("UPDATE session SET status = 'revoked' WHERE session_id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE session SET status = 'expired' WHERE status = 'active' AND expires_at <= ?")
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use procura_core::domain::procurement::{OrgId, UserId};
    use procura_core::domain::session::{RateLimitClass, Session, SessionId, SessionStatus};

    use super::{SessionRepository, SqlSessionRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlSessionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlSessionRepository::new(pool)
    }

    fn session(id: &str, ttl_minutes: i64) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId(id.to_string()),
            user_id: UserId("user-1".to_string()),
            org_id: OrgId("org-1".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("procura-cli/0.1".to_string()),
            status: SessionStatus::Active,
            expires_at: now + Duration::minutes(ttl_minutes),
            api_requests: 0,
            messages_sent: 0,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn unknown_session_is_none_not_error() {
        let repo = setup().await;
        let found =
            repo.find_valid(&SessionId("missing".to_string()), Utc::now()).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn expired_session_is_none_and_marked_expired() {
        let repo = setup().await;
        repo.save(&session("sess-1", -5)).await.expect("save");

        let id = SessionId("sess-1".to_string());
        let found = repo.find_valid(&id, Utc::now()).await.expect("find");
        assert!(found.is_none());

        // Second lookup still misses; the row has been flipped, not removed.
        let again = repo.find_valid(&id, Utc::now()).await.expect("find again");
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn active_session_round_trips_with_counters() {
        let repo = setup().await;
        repo.save(&session("sess-1", 30)).await.expect("save");

        let id = SessionId("sess-1".to_string());
        repo.record_activity(&id, RateLimitClass::ApiRequests).await.expect("bump api");
        repo.record_activity(&id, RateLimitClass::ApiRequests).await.expect("bump api");
        repo.record_activity(&id, RateLimitClass::Messages).await.expect("bump msg");

        let found = repo.find_valid(&id, Utc::now()).await.expect("find").expect("present");
        assert_eq!(found.api_requests, 2);
        assert_eq!(found.messages_sent, 1);
    }

    #[tokio::test]
    async fn revoked_session_is_invisible() {
        let repo = setup().await;
        repo.save(&session("sess-1", 30)).await.expect("save");

        let id = SessionId("sess-1".to_string());
        repo.revoke(&id).await.expect("revoke");

        assert!(repo.find_valid(&id, Utc::now()).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn expire_stale_flips_only_overdue_sessions() {
        let repo = setup().await;
        repo.save(&session("sess-live", 30)).await.expect("save live");
        repo.save(&session("sess-old", -5)).await.expect("save old");

        let flipped = repo.expire_stale(Utc::now()).await.expect("sweep");
        assert_eq!(flipped, 1);

        assert!(repo
            .find_valid(&SessionId("sess-live".to_string()), Utc::now())
            .await
            .expect("find live")
            .is_some());
    }
}
