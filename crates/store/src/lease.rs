use chrono::{DateTime, Duration, Utc};

use crate::{DbPool, StoreError};

/// Named single-holder lease guarding the periodic sweeps. Only the instance
/// holding the lease runs a sweep, so reminders are not double-sent when
/// several servers share one state store.
pub struct SweepLease {
    pool: DbPool,
    name: String,
    holder: String,
    ttl: Duration,
}

impl SweepLease {
    pub fn new(
        pool: DbPool,
        name: impl Into<String>,
        holder: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self { pool, name: name.into(), holder: holder.into(), ttl }
    }

    /// Takes the lease if it is free, expired, or already ours (renewal).
    pub async fn try_acquire(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let expires_at = (now + self.ttl).to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO sweep_lease (name, holder, expires_at)
             VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                 holder = excluded.holder,
                 expires_at = excluded.expires_at
             WHERE sweep_lease.expires_at <= ? OR sweep_lease.holder = excluded.holder",
        )
        .bind(&self.name)
        .bind(&self.holder)
        .bind(expires_at)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sweep_lease WHERE name = ? AND holder = ?")
            .bind(&self.name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
