use std::sync::Arc;
use uuid::Uuid;

use crate::ws::coordinator::Coordinator;

/// Runs the coordinator's disconnect path when a socket task exits, however
/// it exits. Disconnect is idempotent, so an earlier explicit cleanup is fine.
pub struct DisconnectGuard {
    coordinator: Arc<Coordinator>,
    client_id: String,
    conn_id: Uuid,
}

impl DisconnectGuard {
    pub fn new(coordinator: Arc<Coordinator>, client_id: String, conn_id: Uuid) -> Self {
        Self { coordinator, client_id, conn_id }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.coordinator.on_disconnect(&self.client_id, self.conn_id);
    }
}
