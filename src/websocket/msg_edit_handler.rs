use tracing::{info, warn};

use crate::models::{with_lock_fields, Envelope, MessageKind};
use crate::websocket::router::RouteCtx;
use crate::ws::docsession::LockOutcome;

/// Handle an edit message: take or refresh the lock, then relay with the lock details.
pub fn handle_edit_message(ctx: &mut RouteCtx<'_>, envelope: Envelope) {
    let Some(document_id) = ctx.target_document(envelope.document_id.as_deref(), &envelope.kind) else {
        return;
    };

    let ttl = ctx.settings.lock_ttl;
    let outcome = if ctx.settings.edit_overrides_lock {
        ctx.state.acquire_lock_overriding(&document_id, ctx.sender, ttl, ctx.now)
    } else {
        ctx.state.try_acquire_lock(&document_id, ctx.sender, ttl, ctx.now)
    };

    let expiry = match outcome {
        Ok(LockOutcome::Granted { expiry, previous_holder }) => {
            if let Some(previous) = previous_holder {
                info!("🔒 Lock on {} passed from {} to {}", document_id, previous, ctx.sender);
            }
            expiry
        }
        Ok(LockOutcome::Denied { holder, expiry }) => {
            info!("Edit from {} on {} rejected: locked by {}", ctx.sender, document_id, holder);
            ctx.send_conflict(&document_id, &holder, expiry);
            return;
        }
        Err(e) => {
            warn!("⚠️ Edit from {} dropped: {}", ctx.sender, e);
            return;
        }
    };

    let Some(version) = ctx.state.bump_version(&document_id, ctx.now) else {
        return;
    };

    let mut relay = Envelope::new(MessageKind::Edit, ctx.sender)
        .with_document(document_id.clone())
        .with_version(version)
        .with_data(with_lock_fields(envelope.data, ctx.sender, expiry));
    relay.timestamp = ctx.now;
    ctx.state.broadcast(&document_id, &relay, Some(ctx.sender));

    info!("✏️ User {} is editing document {} (lock until {})", ctx.sender, document_id, expiry);
}
