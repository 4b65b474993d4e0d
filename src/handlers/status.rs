use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::debug;

use crate::models::StatusResponse;
use crate::ws::coordinator::Coordinator;

/// Connection and session counts plus uptime
pub async fn status(State(coordinator): State<Arc<Coordinator>>) -> Json<StatusResponse> {
    let status = coordinator.get_status();
    debug!(
        "Status requested: {} connection(s), {} session(s)",
        status.connected_users, status.active_sessions
    );
    Json(status)
}
