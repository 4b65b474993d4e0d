use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::SyncSettings;
use crate::models::{Envelope, MessageKind};
use crate::websocket::msg_edit_handler::handle_edit_message;
use crate::websocket::msg_heartbeat_handler::handle_heartbeat_message;
use crate::websocket::msg_join_handler::handle_join_message;
use crate::websocket::msg_leave_handler::handle_leave_message;
use crate::websocket::msg_sync_handler::handle_sync_message;
use crate::ws::syncstate::SyncState;

/// Everything a message handler may touch while processing one envelope.
pub struct RouteCtx<'a> {
    pub state: &'a mut SyncState,
    pub settings: &'a SyncSettings,
    pub sender: &'a str,
    pub now: DateTime<Utc>,
}

impl RouteCtx<'_> {
    /// Document a sync or edit applies to: the one named in the envelope,
    /// else the one the sender joined. The sender must be a member.
    pub fn target_document(&self, requested: Option<&str>, kind: &MessageKind) -> Option<String> {
        let joined = self
            .state
            .connections()
            .get(self.sender)
            .and_then(|conn| conn.document_id.clone());

        let Some(document_id) = requested.map(str::to_string).or(joined) else {
            warn!("⚠️ {} message from {} has no document", kind, self.sender);
            return None;
        };

        let is_member = self
            .state
            .sessions()
            .get(&document_id)
            .is_some_and(|session| session.is_member(self.sender));
        if !is_member {
            warn!("⚠️ {} message from {} for document {} it has not joined", kind, self.sender, document_id);
            return None;
        }
        Some(document_id)
    }

    /// Tell the sender who holds the lock that blocked it.
    pub fn send_conflict(&mut self, document_id: &str, holder: &str, expiry: DateTime<Utc>) {
        let conflict = Envelope::from_server(MessageKind::Conflict)
            .with_document(document_id)
            .with_data(json!({
                "message": format!("Document is locked by user {}", holder),
                "lockHolder": holder,
                "lockExpiry": expiry,
            }));
        self.state.send_to(self.sender, &conflict);
    }
}

/// Dispatch one parsed envelope by kind.
pub fn route_message(ctx: &mut RouteCtx<'_>, envelope: Envelope) {
    debug!("Received {} message from {}", envelope.kind, ctx.sender);

    match envelope.kind {
        MessageKind::Join => handle_join_message(ctx, envelope),
        MessageKind::Leave => handle_leave_message(ctx, envelope),
        MessageKind::Sync => handle_sync_message(ctx, envelope),
        MessageKind::Edit => handle_edit_message(ctx, envelope),
        MessageKind::Heartbeat => handle_heartbeat_message(ctx, envelope),
        MessageKind::Conflict => {
            warn!("⚠️ Client {} sent a server-only conflict message; dropped", ctx.sender);
        }
        MessageKind::Unknown(ref kind) => {
            warn!("⚠️ Unknown message type from {}: {}", ctx.sender, kind);
        }
    }
}

/// Parse a text frame. Malformed input is logged and yields `None`.
pub fn parse_envelope(sender: &str, text: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!("Failed to parse message from {}: {}", sender, e);
            None
        }
    }
}
