use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::procurement::{OrgId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "expired" => Self::Expired,
            "revoked" => Self::Revoked,
            _ => Self::Active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub org_id: OrgId,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    pub api_requests: u64,
    pub messages_sent: u64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now < self.expires_at
    }
}

/// Fixed-window limit classes guarding externally triggered entry points.
/// Concurrent connections are not windowed; they are enforced against the
/// live connection registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitClass {
    ApiRequests,
    Messages,
}

impl RateLimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiRequests => "api_requests",
            Self::Messages => "messages",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub current: u32,
    pub max: u32,
    pub window_seconds: u64,
    /// Seconds until the window resets; present once the limit is exceeded.
    pub retry_after: Option<u64>,
}
