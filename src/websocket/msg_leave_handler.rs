use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::{Envelope, MessageKind};
use crate::websocket::router::RouteCtx;

/// Handle a leave message
pub fn handle_leave_message(ctx: &mut RouteCtx<'_>, envelope: Envelope) {
    let joined = ctx
        .state
        .connections()
        .get(ctx.sender)
        .and_then(|conn| conn.document_id.clone());

    // A leave naming some other document is ignored rather than applied to the joined one.
    if let (Some(requested), Some(current)) = (envelope.document_id.as_deref(), joined.as_deref()) {
        if requested != current {
            warn!("⚠️ {} asked to leave {} but is in {}", ctx.sender, requested, current);
            return;
        }
    }

    let Some(outcome) = ctx.state.leave_document(ctx.sender, ctx.now) else {
        debug!("Leave from {} ignored: not in a document", ctx.sender);
        return;
    };

    let ack = Envelope::from_server(MessageKind::Leave)
        .with_document(outcome.document_id.clone())
        .with_data(json!({
            "message": format!("Left document {}", outcome.document_id),
            "lockReleased": outcome.released_lock,
        }));
    ctx.state.send_to(ctx.sender, &ack);
    ctx.state.announce_departure(ctx.sender, &outcome);
    info!("👋 User {} left document {}", ctx.sender, outcome.document_id);
}
