use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An active edit lock on a document session
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub holder: String,
    pub expiry: DateTime<Utc>,
}

/// Read-only view of one document session
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    pub document_id: String,
    pub members: Vec<String>,
    pub version: u64,
    pub last_activity: DateTime<Utc>,
    pub lock: Option<LockInfo>,
}
