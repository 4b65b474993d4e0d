use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::debug;

use crate::models::{ErrorResponse, SessionInfoResponse};
use crate::ws::coordinator::Coordinator;

/// Inspect one document session
pub async fn session_info(
    State(coordinator): State<Arc<Coordinator>>,
    Path(doc_id): Path<String>,
) -> Result<Json<SessionInfoResponse>, (StatusCode, Json<ErrorResponse>)> {
    match coordinator.session_info(&doc_id) {
        Some(info) => Ok(Json(info)),
        None => {
            debug!("No active session for document '{}'", doc_id);
            Err(ErrorResponse::with_status(
                StatusCode::NOT_FOUND,
                format!("No active session for document '{}'", doc_id),
            ))
        }
    }
}
