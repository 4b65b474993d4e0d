use serde_json::json;
use tracing::debug;

use crate::models::{Envelope, MessageKind};
use crate::websocket::router::RouteCtx;

/// Handle a heartbeat message - reply with the server time.
pub fn handle_heartbeat_message(ctx: &mut RouteCtx<'_>, _envelope: Envelope) {
    debug!("Heartbeat from {}", ctx.sender);

    let mut pong = Envelope::from_server(MessageKind::Heartbeat).with_data(json!({ "timestamp": ctx.now }));
    pong.timestamp = ctx.now;
    ctx.state.send_to(ctx.sender, &pong);
}
