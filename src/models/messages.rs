use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Identity used on every envelope the server originates.
pub const SERVER_SENDER: &str = "server";

/// Kind tag of an [`Envelope`].
///
/// Parsed from a plain string so that an unrecognised kind is still a
/// well-formed envelope the router can log and drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Sync,
    Conflict,
    Join,
    Leave,
    Edit,
    Heartbeat,
    Unknown(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Sync => "sync",
            MessageKind::Conflict => "conflict",
            MessageKind::Join => "user-join",
            MessageKind::Leave => "user-leave",
            MessageKind::Edit => "edit",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Unknown(kind) => kind,
        }
    }
}

impl From<String> for MessageKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "sync" => MessageKind::Sync,
            "conflict" => MessageKind::Conflict,
            "user-join" | "join" => MessageKind::Join,
            "user-leave" | "leave" => MessageKind::Leave,
            "edit" => MessageKind::Edit,
            "heartbeat" => MessageKind::Heartbeat,
            _ => MessageKind::Unknown(kind),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit exchanged over a sync connection, in both directions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type", alias = "kind")]
    pub kind: MessageKind,
    #[serde(alias = "senderIdentity", default)]
    pub user_id: String,
    #[serde(alias = "documentIdentity", default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(alias = "payload", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: MessageKind, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            document_id: None,
            data: None,
            version: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_server(kind: MessageKind) -> Self {
        Self::new(kind, SERVER_SENDER)
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Merge lock details into an edit payload.
///
/// Object payloads keep their fields; anything else is carried under `content`.
pub fn with_lock_fields(data: Option<Value>, holder: &str, expiry: DateTime<Utc>) -> Value {
    let mut merged = match data {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => json!({}),
        Some(other) => json!({ "content": other }),
    };
    merged["lockHolder"] = json!(holder);
    merged["lockExpiry"] = json!(expiry);
    merged
}
