//! Usage-class pool management. Each class of database work gets its own
//! SQLite pool so a flood of checkpoint writes cannot starve interactive
//! reads. Pools are opened lazily on first use and initialization is
//! single-flight per class.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::OnceCell;

use crate::connection::{connect_with_settings, DbPool};
use crate::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolClass {
    /// User-facing request paths: intake, status, resume.
    Interactive,
    /// Workflow checkpoint and audit writes.
    Checkpoint,
    /// Session and rate-limit bookkeeping.
    Session,
    /// Fan-out reads for notification delivery.
    Broadcast,
}

impl PoolClass {
    pub const ALL: [PoolClass; 4] =
        [Self::Interactive, Self::Checkpoint, Self::Session, Self::Broadcast];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Checkpoint => "checkpoint",
            Self::Session => "session",
            Self::Broadcast => "broadcast",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Interactive => 0,
            Self::Checkpoint => 1,
            Self::Session => 2,
            Self::Broadcast => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StateStoreSettings {
    pub url: String,
    pub max_connections_per_pool: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for StateStoreSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://procura.db".to_string(),
            max_connections_per_pool: 5,
            acquire_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolHealth {
    pub class: PoolClass,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub class: PoolClass,
    pub acquires: u64,
    pub avg_acquire_latency_us: u64,
    pub init_failures: u64,
    pub initialized: bool,
}

/// Per-class snapshots plus the aggregate across all four classes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreMetricsSnapshot {
    pub pools: Vec<PoolMetricsSnapshot>,
    pub total_acquires: u64,
    pub avg_acquire_latency_us: u64,
    pub total_init_failures: u64,
}

#[derive(Default)]
struct PoolSlot {
    cell: OnceCell<DbPool>,
    acquires: AtomicU64,
    acquire_nanos: AtomicU64,
    init_failures: AtomicU64,
}

pub struct StateStore {
    settings: StateStoreSettings,
    /// An in-memory SQLite database exists per connection, so every class
    /// must share one single-connection pool to see the same data.
    shared_memory: bool,
    slots: [PoolSlot; 4],
}

fn is_memory_url(url: &str) -> bool {
    url == ":memory:" || url.contains(":memory:") || url.contains("mode=memory")
}

fn average_micros(total_nanos: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        total_nanos / count / 1_000
    }
}

impl StateStore {
    pub fn new(settings: StateStoreSettings) -> Self {
        let shared_memory = is_memory_url(&settings.url);
        Self { settings, shared_memory, slots: Default::default() }
    }

    pub async fn pool(&self, class: PoolClass) -> Result<DbPool, StoreError> {
        let slot = if self.shared_memory {
            &self.slots[PoolClass::Interactive.index()]
        } else {
            &self.slots[class.index()]
        };
        let counters = &self.slots[class.index()];
        let started = Instant::now();

        let max_connections =
            if self.shared_memory { 1 } else { self.settings.max_connections_per_pool };

        let pool = slot
            .cell
            .get_or_try_init(|| async {
                connect_with_settings(
                    &self.settings.url,
                    max_connections,
                    self.settings.acquire_timeout_secs,
                )
                .await
            })
            .await
            .map_err(|err| {
                counters.init_failures.fetch_add(1, Ordering::Relaxed);
                StoreError::Database(err)
            })?;

        counters.acquires.fetch_add(1, Ordering::Relaxed);
        counters.acquire_nanos.fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        Ok(pool.clone())
    }

    /// Probes every usage class with a round trip. A class that has not been
    /// initialized yet gets initialized by the probe.
    pub async fn ping_all_pools(&self) -> Vec<PoolHealth> {
        let mut report = Vec::with_capacity(PoolClass::ALL.len());

        for class in PoolClass::ALL {
            let started = Instant::now();
            let outcome = match self.pool(class).await {
                Ok(pool) => sqlx::query("SELECT 1").execute(&pool).await.map(|_| ()),
                Err(StoreError::Database(err)) => Err(err),
                Err(StoreError::Decode(message)) => Err(sqlx::Error::Decode(message.into())),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            report.push(match outcome {
                Ok(()) => PoolHealth { class, healthy: true, latency_ms, error: None },
                Err(err) => {
                    PoolHealth { class, healthy: false, latency_ms, error: Some(err.to_string()) }
                }
            });
        }

        report
    }

    pub fn metrics(&self) -> StoreMetricsSnapshot {
        let mut total_acquires = 0u64;
        let mut total_nanos = 0u64;
        let mut total_init_failures = 0u64;

        let pools = PoolClass::ALL
            .iter()
            .map(|class| {
                let slot = &self.slots[class.index()];
                let initialized = if self.shared_memory {
                    self.slots[PoolClass::Interactive.index()].cell.get().is_some()
                } else {
                    slot.cell.get().is_some()
                };
                let acquires = slot.acquires.load(Ordering::Relaxed);
                let nanos = slot.acquire_nanos.load(Ordering::Relaxed);
                let init_failures = slot.init_failures.load(Ordering::Relaxed);

                total_acquires += acquires;
                total_nanos += nanos;
                total_init_failures += init_failures;

                PoolMetricsSnapshot {
                    class: *class,
                    acquires,
                    avg_acquire_latency_us: average_micros(nanos, acquires),
                    init_failures,
                    initialized,
                }
            })
            .collect();

        StoreMetricsSnapshot {
            pools,
            total_acquires,
            avg_acquire_latency_us: average_micros(total_nanos, total_acquires),
            total_init_failures,
        }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let pool = self.pool(PoolClass::Checkpoint).await?;
        crate::migrations::run_pending(&pool)
            .await
            .map_err(|err| StoreError::Database(sqlx::Error::Migrate(Box::new(err))))
    }

    pub async fn close(&self) {
        for class in PoolClass::ALL {
            if let Some(pool) = self.slots[class.index()].cell.get() {
                pool.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PoolClass, StateStore, StateStoreSettings};

    fn memory_store() -> StateStore {
        StateStore::new(StateStoreSettings {
            url: "sqlite::memory:".to_string(),
            ..StateStoreSettings::default()
        })
    }

    #[tokio::test]
    async fn memory_classes_share_one_database() {
        let store = memory_store();
        store.run_migrations().await.expect("migrations");

        let checkpoint = store.pool(PoolClass::Checkpoint).await.expect("checkpoint pool");
        sqlx::query(
            "INSERT INTO sweep_lease (name, holder, expires_at) VALUES ('probe', 'h1', '2026-01-01T00:00:00Z')",
        )
        .execute(&checkpoint)
        .await
        .expect("insert via checkpoint class");

        let broadcast = store.pool(PoolClass::Broadcast).await.expect("broadcast pool");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sweep_lease")
            .fetch_one(&broadcast)
            .await
            .expect("read via broadcast class");

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn metrics_track_acquires_per_class() {
        let store = memory_store();

        store.pool(PoolClass::Interactive).await.expect("interactive");
        store.pool(PoolClass::Interactive).await.expect("interactive again");
        store.pool(PoolClass::Session).await.expect("session");

        let snapshot = store.metrics();
        let by_class = |class: PoolClass| {
            snapshot.pools.iter().find(|m| m.class == class).expect("class present").clone()
        };

        assert_eq!(by_class(PoolClass::Interactive).acquires, 2);
        assert_eq!(by_class(PoolClass::Session).acquires, 1);
        assert_eq!(by_class(PoolClass::Broadcast).acquires, 0);
        assert_eq!(snapshot.total_acquires, 3);
    }

    #[tokio::test]
    async fn acquire_latency_feeds_the_averages() {
        let store = memory_store();
        store.pool(PoolClass::Interactive).await.expect("interactive");

        let snapshot = store.metrics();
        let interactive = snapshot
            .pools
            .iter()
            .find(|m| m.class == PoolClass::Interactive)
            .expect("class present");

        // The first acquire opens the pool, so its latency is measurable.
        assert_eq!(interactive.acquires, 1);
        assert!(interactive.avg_acquire_latency_us > 0);
        assert!(snapshot.avg_acquire_latency_us > 0);

        let idle = snapshot.pools.iter().find(|m| m.class == PoolClass::Broadcast).expect("class");
        assert_eq!(idle.avg_acquire_latency_us, 0);
    }

    #[tokio::test]
    async fn ping_reports_all_classes_healthy() {
        let store = memory_store();
        let report = store.ping_all_pools().await;

        assert_eq!(report.len(), 4);
        assert!(report.iter().all(|health| health.healthy));
    }
}
