use chrono::{DateTime, Utc};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::coordinator::Coordinator;
use super::syncstate::SyncState;
use crate::config::SyncSettings;

/// Close code for a connection dropped for inactivity.
pub const CLOSE_NORMAL: u16 = 1000;

/// What one liveness sweep did.
#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    pub newly_stale: usize,
    pub closed: Vec<String>,
    pub expired_locks: Vec<(String, String)>,
}

/// Flag idle connections, close the ones past the hard timeout and clear
/// expired locks.
pub fn sweep_liveness(state: &mut SyncState, settings: &SyncSettings, now: DateTime<Utc>) -> SweepReport {
    let idle = state
        .connections()
        .list_stale(now, settings.idle_threshold, settings.hard_timeout);
    let newly_stale = state.connections_mut().mark_stale(&idle.stale);

    let mut closed = Vec::new();
    for (client_id, conn_id) in idle.dead {
        info!("⏰ User {} inactive for too long, disconnecting", client_id);
        if state.teardown(&client_id, conn_id, CLOSE_NORMAL, "Inactive timeout", now) {
            closed.push(client_id);
        }
    }

    let expired_locks = state.expire_locks(now);
    for (document_id, holder) in &expired_locks {
        debug!("Lock on {} held by {} expired", document_id, holder);
    }

    SweepReport { newly_stale, closed, expired_locks }
}

/// Run [`Coordinator::sweep_liveness`] every `period` until cancelled.
pub async fn run_liveness_sweeper(coordinator: Weak<Coordinator>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Liveness sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                let report = coordinator.sweep_liveness(Utc::now());
                if report.newly_stale > 0 || !report.closed.is_empty() {
                    info!(
                        "Liveness sweep: {} newly stale, {} closed, {} lock(s) expired",
                        report.newly_stale,
                        report.closed.len(),
                        report.expired_locks.len()
                    );
                }
            }
        }
    }
}
