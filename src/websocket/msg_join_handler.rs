use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::models::{Envelope, MessageKind};
use crate::websocket::router::RouteCtx;
use crate::ws::syncstate::SyncState;

pub const WELCOME_MESSAGE: &str = "Welcome to the real-time sync server";

/// Handle a join message
pub fn handle_join_message(ctx: &mut RouteCtx<'_>, envelope: Envelope) {
    let Some(document_id) = envelope.document_id.filter(|doc| !doc.trim().is_empty()) else {
        warn!("⚠️ Join message from {} is missing documentId", ctx.sender);
        return;
    };
    join_and_announce(ctx.state, ctx.sender, &document_id, ctx.now);
}

/// Join `client_id` into the session, acknowledge with the session state and
/// tell the other members. Also used for the document given at connect time.
pub fn join_and_announce(state: &mut SyncState, client_id: &str, document_id: &str, now: DateTime<Utc>) -> bool {
    let Some(result) = state.join_document(client_id, document_id, now) else {
        warn!("⚠️ Join for unknown connection {}", client_id);
        return false;
    };
    if let Some(left) = &result.left {
        state.announce_departure(client_id, left);
    }

    if let Some(session) = state.sessions().get(document_id) {
        let info = session.to_info(now);
        let ack = Envelope::from_server(MessageKind::Join)
            .with_document(document_id)
            .with_version(info.version)
            .with_data(json!({
                "message": WELCOME_MESSAGE,
                "session": info,
            }));
        state.send_to(client_id, &ack);
    }

    if result.newly_joined {
        let joined = Envelope::new(MessageKind::Join, client_id)
            .with_document(document_id)
            .with_data(json!({ "message": format!("User {} joined the document", client_id) }));
        state.broadcast(document_id, &joined, Some(client_id));
        info!("✅ User {} joined document {}", client_id, document_id);
    }
    true
}
