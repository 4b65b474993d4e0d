use std::borrow::Cow;
use std::sync::Arc;
use axum::{
    extract::{Query, State, ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade}},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::utils::disconnect_guard::DisconnectGuard;
use crate::ws::connctx::{ConnectionHandle, Outbound};
use crate::ws::coordinator::Coordinator;

/// Connection parameters carried on the upgrade request
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(alias = "senderIdentity")]
    pub user_id: Option<String>,
    #[serde(alias = "documentIdentity")]
    pub document_id: Option<String>,
}

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(coordinator): State<Arc<Coordinator>>,
) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, params, coordinator))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, params: ConnectParams, coordinator: Arc<Coordinator>) {
    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    let user_id = params.user_id.unwrap_or_default();
    let handle = match coordinator.on_connect(&user_id, params.document_id.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("⚠️ Rejecting connection: {}", e);
            let frame = CloseFrame { code: close_code::POLICY, reason: Cow::Owned(e.to_string()) };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let ConnectionHandle { client_id, conn_id, mut outbound, closed } = handle;
    let _guard = DisconnectGuard::new(coordinator.clone(), client_id.clone(), conn_id);

    // Drain the outbound queue into the socket. Queued frames go out before
    // a close request is honoured.
    let writer_closed = closed.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = outbound.recv() => match frame {
                    Some(Outbound::Text(text)) => sender.send(Message::Text(text)).await?,
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame { code, reason: Cow::Owned(reason) };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => break,
                },
                _ = writer_closed.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        Ok::<(), axum::Error>(())
    });

    // Feed inbound frames to the coordinator
    let reader = coordinator.clone();
    let reader_client = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame? {
                Message::Text(text) => reader.on_message(&reader_client, conn_id, &text),
                Message::Binary(data) => {
                    reader.on_activity(&reader_client, conn_id);
                    warn!("⚠️ Dropped {} byte binary frame from {}", data.len(), reader_client);
                }
                Message::Ping(_) | Message::Pong(_) => {
                    reader.on_activity(&reader_client, conn_id);
                }
                Message::Close(_) => {
                    debug!("Close frame from {}", reader_client);
                    break;
                }
            }
        }
        Ok::<(), axum::Error>(())
    });

    // Wait for either task to finish (and finish the other)
    let result = tokio::select! {
        res = (&mut send_task) => { recv_task.abort(); res }
        res = (&mut recv_task) => { send_task.abort(); res }
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            coordinator.on_error(&client_id, conn_id, &e);
        }
        Err(e) if e.is_panic() => {
            coordinator.on_error(&client_id, conn_id, &e);
        }
        Err(_) => {}
    }
    info!("WebSocket connection terminated for {}", client_id);
}
