use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use crate::models::{HealthResponse, ReadyResponse};
use crate::ws::coordinator::Coordinator;
use tracing::debug;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint. Not ready once shutdown has begun.
pub async fn ready_check(State(coordinator): State<Arc<Coordinator>>) -> (StatusCode, Json<ReadyResponse>) {
    debug!("Readiness check requested");
    if coordinator.is_accepting() {
        (StatusCode::OK, Json(ReadyResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
            accepting_connections: true,
        }))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ReadyResponse {
            status: "unavailable".to_string(),
            message: "Service is shutting down".to_string(),
            accepting_connections: false,
        }))
    }
}
