use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for the readiness probe
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub message: String,
    pub accepting_connections: bool,
}
