use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Point-in-time snapshot of the sync server, for external monitoring
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected_users: u32,
    pub active_sessions: u32,
    pub server_time: DateTime<Utc>,
    pub uptime_secs: u64,
}
