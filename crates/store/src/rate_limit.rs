use chrono::{DateTime, Utc};

use procura_core::domain::session::{RateLimitClass, RateLimitDecision};

use crate::{DbPool, StoreError};

/// Fixed-window rate limiting backed by one conditional upsert per check, so
/// concurrent callers cannot both sneak under the limit.
pub struct SqlRateLimiter {
    pool: DbPool,
}

impl SqlRateLimiter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn check(
        &self,
        subject: &str,
        class: RateLimitClass,
        max: u32,
        window_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        let window = window_seconds.max(1) as i64;
        let window_start = now.timestamp().div_euclid(window) * window;

        // Rolling into a new window resets the count to 1 in the same write.
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO rate_limit_window (subject, class, window_start, count)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(subject, class) DO UPDATE SET
                 count = CASE
                     WHEN rate_limit_window.window_start = excluded.window_start
                     THEN rate_limit_window.count + 1
                     ELSE 1
                 END,
                 window_start = excluded.window_start
             RETURNING count",
        )
        .bind(subject)
        .bind(class.as_str())
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        let current = count.clamp(0, i64::from(u32::MAX)) as u32;
        let allowed = current <= max;
        let retry_after = if allowed {
            None
        } else {
            let window_end = window_start + window;
            Some((window_end - now.timestamp()).max(0) as u64)
        };

        Ok(RateLimitDecision {
            allowed,
            current,
            max,
            window_seconds: window as u64,
            retry_after,
        })
    }
}
