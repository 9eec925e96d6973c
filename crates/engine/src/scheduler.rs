//! The periodic sweep: vendor reminders, negotiation deadline enforcement,
//! whole-workflow timeouts and stale-session expiry. One pass runs only
//! while this instance holds the sweep lease, so a fleet sharing a state
//! store never double-sends.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use procura_store::{SessionRepository, SweepLease};

use crate::negotiation::NegotiationCoordinator;
use crate::workflow::WorkflowEngine;
use crate::EngineError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub reminders_sent: u32,
    pub deadlines_finalized: u32,
    pub deadlines_expired: u32,
    pub workflows_timed_out: u32,
    pub sessions_expired: u64,
}

pub struct Sweeper {
    lease: SweepLease,
    engine: Arc<WorkflowEngine>,
    coordinator: Arc<NegotiationCoordinator>,
    sessions: Arc<dyn SessionRepository>,
    sweep_interval: Duration,
}

impl Sweeper {
    pub fn new(
        lease: SweepLease,
        engine: Arc<WorkflowEngine>,
        coordinator: Arc<NegotiationCoordinator>,
        sessions: Arc<dyn SessionRepository>,
        sweep_interval: Duration,
    ) -> Self {
        Self { lease, engine, coordinator, sessions, sweep_interval }
    }

    /// Loops until the shutdown signal flips. Sweep failures are logged and
    /// the loop keeps going; the next tick retries from current state.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(Some(summary)) => {
                            info!(
                                event_name = "sweep_completed",
                                reminders_sent = summary.reminders_sent,
                                deadlines_finalized = summary.deadlines_finalized,
                                deadlines_expired = summary.deadlines_expired,
                                workflows_timed_out = summary.workflows_timed_out,
                                sessions_expired = summary.sessions_expired,
                            );
                        }
                        Ok(None) => {}
                        Err(err) => {
                            error!(event_name = "sweep_failed", error = %err);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(err) = self.lease.release().await {
            error!(event_name = "lease_release_failed", error = %err);
        }
    }

    /// One full pass; `None` means another instance holds the lease.
    pub async fn sweep_once(&self) -> Result<Option<SweepSummary>, EngineError> {
        let now = Utc::now();
        if !self.lease.try_acquire(now).await? {
            return Ok(None);
        }

        let reminders = self.coordinator.send_reminders(now).await?;
        let deadlines = self.engine.enforce_deadlines(now).await?;
        let workflows_timed_out = self.engine.enforce_timeouts(now).await?;
        let sessions_expired = self.sessions.expire_stale(now).await?;

        Ok(Some(SweepSummary {
            reminders_sent: reminders.reminders_sent,
            deadlines_finalized: deadlines.finalized,
            deadlines_expired: deadlines.expired,
            workflows_timed_out,
            sessions_expired,
        }))
    }
}
