use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use procura_store::StateStore;

#[derive(Clone)]
pub struct HealthState {
    state_store: Arc<StateStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolCheck {
    pub pool: &'static str,
    pub status: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pools: Vec<PoolCheck>,
    pub checked_at: String,
}

pub fn router(state_store: Arc<StateStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { state_store })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    state_store: Arc<StateStore>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "health_endpoint_started",
        correlation_id = "bootstrap",
        bind_address = %address,
    );

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(state_store)).await {
            error!(
                event_name = "health_endpoint_failed",
                correlation_id = "bootstrap",
                error = %err,
            );
        }
    });

    Ok(())
}

/// Readiness covers every pool class; a single degraded pool flips the whole
/// response to 503 so load balancers stop routing here.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let pools: Vec<PoolCheck> = state
        .state_store
        .ping_all_pools()
        .await
        .into_iter()
        .map(|probe| PoolCheck {
            pool: probe.class.as_str(),
            status: if probe.healthy { "ready" } else { "degraded" },
            latency_ms: probe.latency_ms,
            detail: probe.error,
        })
        .collect();

    let ready = pools.iter().all(|check| check.status == "ready");
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        pools,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
