use tracing::{debug, info};

use crate::models::{Envelope, MessageKind};
use crate::websocket::router::RouteCtx;

/// Handle a sync message: relay to the other members unless someone else holds the lock.
pub fn handle_sync_message(ctx: &mut RouteCtx<'_>, envelope: Envelope) {
    let Some(document_id) = ctx.target_document(envelope.document_id.as_deref(), &envelope.kind) else {
        return;
    };

    let blocking = ctx
        .state
        .sessions()
        .get(&document_id)
        .and_then(|session| session.active_lock(ctx.now))
        .filter(|lock| lock.holder != ctx.sender)
        .cloned();
    if let Some(lock) = blocking {
        debug!("Sync from {} on {} rejected: locked by {}", ctx.sender, document_id, lock.holder);
        ctx.send_conflict(&document_id, &lock.holder, lock.expiry);
        return;
    }

    let Some(version) = ctx.state.bump_version(&document_id, ctx.now) else {
        return;
    };

    let mut relay = Envelope::new(MessageKind::Sync, ctx.sender)
        .with_document(document_id.clone())
        .with_version(version);
    relay.data = envelope.data;
    relay.timestamp = ctx.now;
    let delivered = ctx.state.broadcast(&document_id, &relay, Some(ctx.sender));

    info!("📤 User {} synced document {} (v{}, {} peer(s))", ctx.sender, document_id, version, delivered);
}
