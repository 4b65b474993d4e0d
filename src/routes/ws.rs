use crate::{websocket::handler::websocket_handler, ws::coordinator::Coordinator};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create the WebSocket sync route
pub fn create_ws_routes(coordinator: Arc<Coordinator>) -> Router {
    Router::<Arc<Coordinator>>::new()
        .route("/ws", get(websocket_handler))
        .with_state(coordinator)
}
