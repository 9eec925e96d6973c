pub mod audit_log;
pub mod checkpoint;
pub mod connection;
pub mod lease;
pub mod migrations;
pub mod negotiation;
pub mod pools;
pub mod rate_limit;
pub mod session;

pub use audit_log::{AuditLog, InMemoryAuditLog, SqlAuditLog};
pub use checkpoint::{CheckpointRecord, CheckpointRepository, SqlCheckpointRepository};
pub use connection::{connect, connect_with_settings, DbPool};
pub use lease::SweepLease;
pub use negotiation::{NegotiationRepository, SqlNegotiationRepository};
pub use pools::{
    PoolClass, PoolHealth, PoolMetricsSnapshot, StateStore, StateStoreSettings,
    StoreMetricsSnapshot,
};
pub use rate_limit::SqlRateLimiter;
pub use session::{SessionRepository, SqlSessionRepository};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to decode stored row: {0}")]
    Decode(String),
}
