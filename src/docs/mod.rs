use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service accepts connections", body = ReadyResponse),
        (status = 503, description = "Service is shutting down", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Sync server status
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses(
        (status = 200, description = "Connection and session counts", body = StatusResponse)
    )
)]
#[allow(dead_code)]
pub async fn status_doc() {}

/// Sync server diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Counters and host resource usage", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Document session details
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{doc_id}",
    params(
        ("doc_id" = String, Path, description = "Document identity")
    ),
    responses(
        (status = 200, description = "Session found", body = SessionInfoResponse),
        (status = 404, description = "No active session", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_info_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        status_doc,
        diagnostics_doc,
        session_info_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            StatusResponse,
            DiagnosticsResponse,
            SessionInfoResponse,
            LockInfo,
            ErrorResponse
        )
    ),
    tags(
        (name = "api", description = "Sync server monitoring endpoints")
    )
)]
pub struct ApiDoc;
