use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connctx::ConnectionHandle;
use super::docsession::ReapReport;
use super::reaper::{self, run_session_reaper};
use super::sweeper::{self, run_liveness_sweeper, SweepReport, CLOSE_NORMAL};
use super::syncstate::SyncState;
use crate::config::SyncSettings;
use crate::models::{Envelope, MessageKind, SessionInfoResponse, StatusResponse};
use crate::websocket::msg_join_handler::{join_and_announce, WELCOME_MESSAGE};
use crate::websocket::router::{parse_envelope, route_message, RouteCtx};

/// Close code sent to every client on shutdown (going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    MissingIdentity,
    ShuttingDown,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::MissingIdentity => write!(f, "Missing userId"),
            ConnectError::ShuttingDown => write!(f, "Server is shutting down"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Counters for the diagnostics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub connections: usize,
    pub stale_connections: usize,
    pub sessions: usize,
    pub empty_sessions: usize,
    pub active_locks: usize,
}

/// Owns the sync state and the two background tasks.
///
/// Each inbound message, disconnect and timer tick runs under one mutex, so
/// state transitions never interleave. Nothing under the mutex awaits;
/// outbound frames are queued with `try_send`.
pub struct Coordinator {
    state: Mutex<SyncState>,
    settings: SyncSettings,
    started_at: Instant,
    accepting: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(settings: SyncSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SyncState::new(settings.empty_session_grace)),
            settings,
            started_at: Instant::now(),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the liveness sweeper and session reaper.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let sweeper = tokio::spawn(run_liveness_sweeper(
            Arc::downgrade(self),
            self.settings.sweep_interval,
            self.shutdown.child_token(),
        ));
        let reaper = tokio::spawn(run_session_reaper(
            Arc::downgrade(self),
            self.settings.reaper_interval,
            self.shutdown.child_token(),
        ));
        lock_ignoring_poison(&self.tasks).extend([sweeper, reaper]);
        info!(
            "Background tasks started (sweep every {:?}, reap every {:?})",
            self.settings.sweep_interval, self.settings.reaper_interval
        );
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        lock_ignoring_poison(&self.state)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Admit a client. A second connection with the same identity replaces
    /// the first, which is closed and cleaned up like a disconnect.
    pub fn on_connect(&self, client_id: &str, document_id: Option<&str>) -> Result<ConnectionHandle, ConnectError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(ConnectError::MissingIdentity);
        }
        if !self.is_accepting() {
            return Err(ConnectError::ShuttingDown);
        }

        let now = Utc::now();
        let mut state = self.state();

        let replaced = state.connections().get(client_id).map(|old| old.conn_id);
        if let Some(old_conn) = replaced {
            info!("🔁 User {} reconnected, replacing connection {}", client_id, old_conn);
            state.teardown(client_id, old_conn, CLOSE_NORMAL, "Replaced by new connection", now);
        }

        let (handle, _) = state
            .connections_mut()
            .admit(client_id, self.settings.outbound_queue, now);
        info!(
            "✅ User {} connected{}",
            client_id,
            document_id.map(|d| format!(" (document: {})", d)).unwrap_or_default()
        );

        match document_id.filter(|doc| !doc.trim().is_empty()) {
            Some(doc) => {
                join_and_announce(&mut *state, client_id, doc, now);
            }
            None => {
                let welcome = Envelope::from_server(MessageKind::Join)
                    .with_data(json!({ "message": WELCOME_MESSAGE }));
                state.send_to(client_id, &welcome);
            }
        }
        state.drain_dead(now);
        Ok(handle)
    }

    /// Process one inbound text frame.
    pub fn on_message(&self, client_id: &str, conn_id: Uuid, text: &str) {
        let now = Utc::now();
        let mut state = self.state();
        if !state.connections_mut().touch(client_id, conn_id, now) {
            warn!("⚠️ Message from unknown connection {} ({}) dropped", client_id, conn_id);
            return;
        }

        if let Some(envelope) = parse_envelope(client_id, text) {
            let mut ctx = RouteCtx {
                state: &mut *state,
                settings: &self.settings,
                sender: client_id,
                now,
            };
            route_message(&mut ctx, envelope);
        }
        state.drain_dead(now);
    }

    /// Record activity that carries no envelope (ping, pong, binary).
    pub fn on_activity(&self, client_id: &str, conn_id: Uuid) -> bool {
        self.state().connections_mut().touch(client_id, conn_id, Utc::now())
    }

    pub fn on_disconnect(&self, client_id: &str, conn_id: Uuid) -> bool {
        let now = Utc::now();
        self.state().teardown(client_id, conn_id, CLOSE_NORMAL, "Connection closed", now)
    }

    /// Transport failure. Same cleanup as a disconnect.
    pub fn on_error(&self, client_id: &str, conn_id: Uuid, err: &dyn std::fmt::Display) -> bool {
        error!("User {} connection error: {}", client_id, err);
        let now = Utc::now();
        self.state().teardown(client_id, conn_id, CLOSE_NORMAL, "Connection error", now)
    }

    pub fn sweep_liveness(&self, now: DateTime<Utc>) -> SweepReport {
        sweeper::sweep_liveness(&mut self.state(), &self.settings, now)
    }

    pub fn reap_sessions(&self, now: DateTime<Utc>) -> ReapReport {
        reaper::reap_sessions(&mut self.state(), &self.settings, now)
    }

    pub fn get_status(&self) -> StatusResponse {
        let state = self.state();
        StatusResponse {
            connected_users: state.connections().len() as u32,
            active_sessions: state.sessions().len() as u32,
            server_time: Utc::now(),
            uptime_secs: self.uptime_secs(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn counts(&self) -> SyncCounts {
        let now = Utc::now();
        let state = self.state();
        SyncCounts {
            connections: state.connections().len(),
            stale_connections: state.connections().stale_count(),
            sessions: state.sessions().len(),
            empty_sessions: state.sessions().iter().filter(|s| s.is_empty()).count(),
            active_locks: state.sessions().active_lock_count(now),
        }
    }

    pub fn session_info(&self, document_id: &str) -> Option<SessionInfoResponse> {
        let now = Utc::now();
        self.state().sessions().get(document_id).map(|s| s.to_info(now))
    }

    /// Notify and close every client, then stop the background tasks.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            debug!("Shutdown already in progress");
            return;
        }
        info!("🔄 Shutting down real-time sync server...");

        let notice = Envelope::from_server(MessageKind::Leave)
            .with_data(json!({ "message": "Server is shutting down" }));
        let closed = self.state().close_all(&notice, CLOSE_GOING_AWAY, "Server shutdown");
        info!("Closed {} connection(s)", closed);

        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = lock_ignoring_poison(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
        info!("✅ Real-time sync server stopped");
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connctx::Outbound;
    use chrono::TimeDelta;

    fn coordinator() -> Arc<Coordinator> {
        Coordinator::new(SyncSettings::default())
    }

    fn drain(handle: &mut ConnectionHandle) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = handle.outbound.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn send(c: &Coordinator, handle: &ConnectionHandle, raw: serde_json::Value) {
        c.on_message(&handle.client_id, handle.conn_id, &raw.to_string());
    }

    #[test]
    fn edit_locks_and_sync_from_peer_conflicts() {
        let c = coordinator();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        drain(&mut a);
        drain(&mut b);

        send(&c, &a, json!({"type": "edit", "userId": "alice", "documentId": "doc1", "data": {"op": "insert"}}));
        let edits = drain(&mut b);
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].kind, MessageKind::Edit);
        assert_eq!(edits[0].user_id, "alice");
        let data = edits[0].data.as_ref().unwrap();
        assert_eq!(data["lockHolder"], "alice");
        assert_eq!(data["op"], "insert");
        assert!(drain(&mut a).is_empty(), "sender must not get its own edit back");

        send(&c, &b, json!({"type": "sync", "documentId": "doc1", "data": {"state": 2}}));
        let replies = drain(&mut b);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageKind::Conflict);
        assert_eq!(replies[0].data.as_ref().unwrap()["lockHolder"], "alice");
        assert!(drain(&mut a).is_empty(), "rejected sync must not be broadcast");
    }

    #[test]
    fn holder_disconnect_unblocks_peer() {
        let c = coordinator();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        send(&c, &a, json!({"type": "edit", "documentId": "doc1"}));
        drain(&mut a);
        drain(&mut b);

        assert!(c.on_disconnect("alice", a.conn_id));
        assert!(!c.on_error("alice", a.conn_id, &"late error"));
        let left = drain(&mut b);
        assert_eq!(left[0].kind, MessageKind::Leave);

        let mut carol = c.on_connect("carol", Some("doc1")).unwrap();
        drain(&mut b);
        drain(&mut carol);

        send(&c, &b, json!({"type": "sync", "data": {"n": 1}}));
        let relayed = drain(&mut carol);
        assert_eq!(relayed[0].kind, MessageKind::Sync);
        assert_eq!(relayed[0].version, Some(2));
        assert!(drain(&mut b).is_empty());

        send(&c, &b, json!({"type": "edit", "data": {}}));
        assert_eq!(c.session_info("doc1").unwrap().lock.unwrap().holder, "bob");
    }

    #[test]
    fn versions_arrive_in_order() {
        let c = coordinator();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        drain(&mut a);
        drain(&mut b);

        for i in 0..5 {
            send(&c, &a, json!({"type": "sync", "data": i}));
        }
        let versions: Vec<u64> = drain(&mut b).into_iter().filter_map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn edit_is_denied_while_peer_holds_lock() {
        let c = coordinator();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        send(&c, &a, json!({"type": "edit"}));
        drain(&mut a);
        drain(&mut b);

        send(&c, &b, json!({"type": "edit"}));
        let replies = drain(&mut b);
        assert_eq!(replies[0].kind, MessageKind::Conflict);
        assert!(drain(&mut a).is_empty());
        assert_eq!(c.session_info("doc1").unwrap().lock.unwrap().holder, "alice");
    }

    #[test]
    fn edit_can_override_when_configured() {
        let c = Coordinator::new(SyncSettings { edit_overrides_lock: true, ..SyncSettings::default() });
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let b = c.on_connect("bob", Some("doc1")).unwrap();
        send(&c, &a, json!({"type": "edit"}));
        send(&c, &b, json!({"type": "edit"}));

        assert_eq!(c.session_info("doc1").unwrap().lock.unwrap().holder, "bob");
        let seen = drain(&mut a);
        assert_eq!(seen.last().unwrap().data.as_ref().unwrap()["lockHolder"], "bob");
    }

    #[test]
    fn join_and_leave_messages() {
        let c = coordinator();
        let mut a = c.on_connect("alice", None).unwrap();
        let welcome = drain(&mut a);
        assert_eq!(welcome[0].kind, MessageKind::Join);
        assert_eq!(welcome[0].user_id, "server");

        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        drain(&mut b);

        send(&c, &a, json!({"type": "join", "documentId": "doc1"}));
        let ack = drain(&mut a);
        assert_eq!(ack[0].user_id, "server");
        assert_eq!(ack[0].data.as_ref().unwrap()["session"]["members"], json!(["alice", "bob"]));
        let joined = drain(&mut b);
        assert_eq!(joined[0].kind, MessageKind::Join);
        assert_eq!(joined[0].user_id, "alice");

        send(&c, &a, json!({"type": "leave"}));
        assert_eq!(drain(&mut a)[0].kind, MessageKind::Leave);
        assert_eq!(drain(&mut b)[0].user_id, "alice");
        assert!(!c.session_info("doc1").unwrap().members.contains(&"alice".to_string()));
    }

    #[test]
    fn heartbeat_replies_to_sender_only() {
        let c = coordinator();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        drain(&mut a);
        drain(&mut b);

        send(&c, &a, json!({"type": "heartbeat"}));
        let reply = drain(&mut a);
        assert_eq!(reply[0].kind, MessageKind::Heartbeat);
        assert!(reply[0].data.as_ref().unwrap().get("timestamp").is_some());
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn bad_input_does_not_disturb_other_sessions() {
        let c = coordinator();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc2")).unwrap();
        let mut d = c.on_connect("dave", Some("doc2")).unwrap();
        drain(&mut a);
        drain(&mut b);
        drain(&mut d);

        c.on_message("alice", a.conn_id, "{not json");
        send(&c, &a, json!({"type": "teleport"}));
        send(&c, &a, json!({"type": "conflict"}));
        // Alice is not a member of doc2.
        send(&c, &a, json!({"type": "sync", "documentId": "doc2"}));
        send(&c, &a, json!({"type": "edit", "documentId": "doc2"}));

        assert!(drain(&mut b).is_empty());
        assert!(drain(&mut d).is_empty());
        assert_eq!(c.session_info("doc2").unwrap().version, 0);
        assert!(c.session_info("doc2").unwrap().lock.is_none());

        send(&c, &b, json!({"type": "sync"}));
        assert_eq!(drain(&mut d).len(), 1);
    }

    #[test]
    fn reconnect_replaces_previous_connection() {
        let c = coordinator();
        let first = c.on_connect("alice", Some("doc1")).unwrap();
        let mut second = c.on_connect("alice", Some("doc1")).unwrap();

        assert!(first.closed.is_cancelled());
        assert_eq!(c.get_status().connected_users, 1);
        // The old socket finishing must not remove the new one.
        assert!(!c.on_disconnect("alice", first.conn_id));
        assert_eq!(c.session_info("doc1").unwrap().members, vec!["alice".to_string()]);
        assert_eq!(drain(&mut second)[0].kind, MessageKind::Join);
    }

    #[test]
    fn last_member_leaving_resets_session() {
        let c = coordinator();
        let a = c.on_connect("alice", Some("doc1")).unwrap();
        send(&c, &a, json!({"type": "sync"}));
        assert_eq!(c.session_info("doc1").unwrap().version, 1);

        c.on_disconnect("alice", a.conn_id);
        assert!(c.session_info("doc1").is_none());
        assert_eq!(c.get_status().active_sessions, 0);

        let _b = c.on_connect("bob", Some("doc1")).unwrap();
        assert_eq!(c.session_info("doc1").unwrap().version, 0);
    }

    #[test]
    fn idle_connection_is_closed_by_sweep() {
        let c = coordinator();
        let a = c.on_connect("alice", Some("doc1")).unwrap();
        let mut b = c.on_connect("bob", Some("doc1")).unwrap();
        drain(&mut b);

        let report = c.sweep_liveness(Utc::now() + TimeDelta::minutes(6));
        assert_eq!(report.closed.len(), 2);
        assert!(a.closed.is_cancelled());
        assert_eq!(c.get_status().connected_users, 0);
        assert!(c.session_info("doc1").is_none());
    }

    #[test]
    fn empty_identity_is_rejected() {
        let c = coordinator();
        assert_eq!(c.on_connect("  ", None).unwrap_err(), ConnectError::MissingIdentity);
    }

    #[tokio::test]
    async fn shutdown_notifies_clients_and_stops_tasks() {
        let c = coordinator();
        c.start_background_tasks();
        let mut a = c.on_connect("alice", Some("doc1")).unwrap();
        drain(&mut a);

        c.shutdown().await;
        let notice = drain(&mut a);
        assert_eq!(notice[0].kind, MessageKind::Leave);
        assert_eq!(notice[0].user_id, "server");
        assert!(a.closed.is_cancelled());
        assert!(!c.is_accepting());
        assert_eq!(c.on_connect("bob", None).unwrap_err(), ConnectError::ShuttingDown);
        assert!(lock_ignoring_poison(&c.tasks).is_empty());

        // Second call is a no-op.
        c.shutdown().await;
    }
}
