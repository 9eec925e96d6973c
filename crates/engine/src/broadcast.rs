//! Live-connection registry and UI-event fan-out. Delivery is best effort
//! with per-recipient failure isolation; a full or closed channel never
//! aborts the rest of a broadcast.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use procura_core::domain::procurement::{UiEvent, UserId};
use procura_core::errors::ProcurementError;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

struct Registration {
    user_id: UserId,
    sender: mpsc::Sender<UiEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: u32,
    pub failed: u32,
}

#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Registration>>,
    max_per_user: Option<u32>,
}

impl ConnectionManager {
    pub fn new(max_per_user: u32) -> Self {
        Self { connections: RwLock::new(HashMap::new()), max_per_user: Some(max_per_user) }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<UiEvent>,
    ) -> Result<(), ProcurementError> {
        let mut connections = self.connections.write().await;

        if let Some(max) = self.max_per_user {
            let open = connections
                .values()
                .filter(|registration| registration.user_id == user_id)
                .count() as u32;
            if open >= max {
                return Err(ProcurementError::Validation(format!(
                    "user `{}` already holds {open} of {max} allowed connections",
                    user_id.0
                )));
            }
        }

        connections.insert(id, Registration { user_id, sender });
        Ok(())
    }

    pub async fn unregister(&self, id: &ConnectionId) {
        self.connections.write().await.remove(id);
    }

    pub async fn connections_for_user(&self, user_id: &UserId) -> u32 {
        self.connections
            .read()
            .await
            .values()
            .filter(|registration| &registration.user_id == user_id)
            .count() as u32
    }

    pub async fn broadcast(&self, event: &UiEvent) -> BroadcastReport {
        let connections = self.connections.read().await;
        let mut report = BroadcastReport::default();

        for (id, registration) in connections.iter() {
            match registration.sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        event_name = "broadcast_delivery_failed",
                        connection_id = %id.0,
                        user_id = %registration.user_id.0,
                        error = %err,
                        "dropping undeliverable ui event"
                    );
                }
            }
        }

        report
    }

    pub async fn send_to_user(&self, user_id: &UserId, event: &UiEvent) -> BroadcastReport {
        let connections = self.connections.read().await;
        let mut report = BroadcastReport::default();

        for registration in connections.values() {
            if &registration.user_id != user_id {
                continue;
            }
            match registration.sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        report
    }
}
