use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;
use uuid::Uuid;

use procura_core::config::{AppConfig, ConfigError, LoadOptions};
use procura_core::workflow::retry::RetryPolicy;
use procura_engine::{
    AlwaysInStock, ConnectionManager, EntryGate, NegotiationCoordinator, ProcurementService,
    StaticVendorDirectory, Sweeper, WorkflowEngine,
};
use procura_store::{
    PoolClass, SqlAuditLog, SqlCheckpointRepository, SqlNegotiationRepository, SqlRateLimiter,
    SqlSessionRepository, StateStore, StateStoreSettings, StoreError,
};

use crate::adapters::{
    seed_vendors, HeuristicItemExtractor, LoggingNotifier, LoggingPaymentGateway, OpenOrgDirectory,
};

pub struct Application {
    pub config: AppConfig,
    pub state_store: Arc<StateStore>,
    pub service: Arc<ProcurementService>,
    pub connections: Arc<ConnectionManager>,
    pub sweeper: Sweeper,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("state store initialization failed: {0}")]
    StateStore(#[from] StoreError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "bootstrap_started", correlation_id = "bootstrap");

    let state_store = Arc::new(StateStore::new(StateStoreSettings {
        url: config.state_store.url.clone(),
        max_connections_per_pool: config.state_store.max_connections_per_pool,
        acquire_timeout_secs: config.state_store.acquire_timeout_secs,
    }));
    state_store.run_migrations().await?;
    info!(event_name = "migrations_applied", correlation_id = "bootstrap");

    let interactive = state_store.pool(PoolClass::Interactive).await?;
    let checkpoint = state_store.pool(PoolClass::Checkpoint).await?;
    let session = state_store.pool(PoolClass::Session).await?;

    let checkpoints = Arc::new(SqlCheckpointRepository::new(checkpoint.clone()));
    let negotiations = Arc::new(SqlNegotiationRepository::new(interactive));
    let sessions = Arc::new(SqlSessionRepository::new(session.clone()));
    let audit = Arc::new(SqlAuditLog::new(checkpoint));
    let connections = Arc::new(ConnectionManager::new(config.rate_limit.max_connections_per_user));

    let coordinator = Arc::new(NegotiationCoordinator::new(
        negotiations,
        Arc::new(LoggingNotifier::new(config.notifier.from_address.clone())),
        audit.clone(),
        ChronoDuration::hours(config.negotiation.horizon_hours),
        ChronoDuration::hours(config.negotiation.reminder_cadence_hours),
    ));

    let engine = Arc::new(WorkflowEngine::new(
        checkpoints,
        coordinator.clone(),
        Arc::new(StaticVendorDirectory::new(seed_vendors())),
        Arc::new(HeuristicItemExtractor),
        Arc::new(AlwaysInStock),
        Arc::new(LoggingPaymentGateway::new(config.payment.default_currency.clone())),
        Arc::new(OpenOrgDirectory),
        audit,
        connections.clone(),
        RetryPolicy {
            max_retries: config.workflow.max_retries,
            base_delay_ms: config.workflow.retry_base_delay_ms,
        },
        ChronoDuration::hours(config.workflow.timeout_hours),
    ));

    let gate = EntryGate::new(
        sessions.clone(),
        SqlRateLimiter::new(session.clone()),
        config.rate_limit.clone(),
    );
    let service = Arc::new(ProcurementService::new(gate, engine.clone(), coordinator.clone()));

    // Lease TTL spans two sweep intervals so a crashed holder is replaced
    // after at most one missed pass.
    let sweep_interval = config.negotiation.sweep_interval_secs.max(1);
    let lease = procura_store::SweepLease::new(
        session,
        "negotiation-sweep",
        format!("procura-{}", Uuid::new_v4()),
        ChronoDuration::seconds((sweep_interval * 2) as i64),
    );
    let sweeper = Sweeper::new(
        lease,
        engine,
        coordinator,
        sessions,
        Duration::from_secs(sweep_interval),
    );

    info!(event_name = "bootstrap_completed", correlation_id = "bootstrap");

    Ok(Application { config, state_store, service, connections, sweeper })
}
