use chrono::{DateTime, Utc};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::coordinator::Coordinator;
use super::docsession::ReapReport;
use super::syncstate::SyncState;
use crate::config::SyncSettings;

/// Drop inactive sessions that no longer have members.
pub fn reap_sessions(state: &mut SyncState, settings: &SyncSettings, now: DateTime<Utc>) -> ReapReport {
    let report = state.reap_sessions(now, settings.session_idle);
    if !report.removed.is_empty() {
        info!("🧹 Reaped {} inactive session(s)", report.removed.len());
    }
    report
}

/// Run [`Coordinator::reap_sessions`] every `period` until cancelled.
pub async fn run_session_reaper(coordinator: Weak<Coordinator>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Session reaper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.reap_sessions(Utc::now());
            }
        }
    }
}
