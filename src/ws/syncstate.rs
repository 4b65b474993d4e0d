use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connctx::{Connection, ConnectionRegistry, Outbound, SendFailure};
use super::docsession::{LeaveOutcome, LockOutcome, ReapReport, SessionError, SessionTable};
use crate::models::{Envelope, MessageKind};

/// Close code used when the server gives up on a client (policy violation).
pub const CLOSE_POLICY: u16 = 1008;

/// Result of moving a connection into a document session.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResult {
    pub newly_joined: bool,
    /// Session the connection had to leave first, if it was in another one.
    pub left: Option<LeaveOutcome>,
}

/// The connection registry and session table behind one writer.
///
/// Every change that spans both tables goes through here, so a connection's
/// joined document always lists it as a member and a departing member never
/// keeps a lock.
#[derive(Debug)]
pub struct SyncState {
    connections: ConnectionRegistry,
    sessions: SessionTable,
    /// Connections whose queue overflowed or closed during the current step.
    pending_dead: Vec<(String, Uuid)>,
}

impl SyncState {
    pub fn new(empty_grace: Option<TimeDelta>) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            sessions: SessionTable::new(empty_grace),
            pending_dead: Vec::new(),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.connections
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn try_acquire_lock(
        &mut self,
        document_id: &str,
        client_id: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, SessionError> {
        self.sessions.try_acquire_lock(document_id, client_id, ttl, now)
    }

    pub fn acquire_lock_overriding(
        &mut self,
        document_id: &str,
        client_id: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, SessionError> {
        self.sessions.acquire_lock_overriding(document_id, client_id, ttl, now)
    }

    pub fn bump_version(&mut self, document_id: &str, now: DateTime<Utc>) -> Option<u64> {
        self.sessions.bump_version(document_id, now)
    }

    pub fn expire_locks(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        self.sessions.expire_locks(now)
    }

    pub fn reap_sessions(&mut self, now: DateTime<Utc>, idle_window: TimeDelta) -> ReapReport {
        self.sessions.reap(now, idle_window)
    }

    /// Queue an envelope for one client. A full or closed queue marks the
    /// connection for teardown at the end of the step.
    pub fn send_to(&mut self, client_id: &str, envelope: &Envelope) -> bool {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} message for {}: {}", envelope.kind, client_id, e);
                return false;
            }
        };
        match self.connections.get(client_id) {
            Some(conn) => deliver(conn, text, &mut self.pending_dead),
            None => false,
        }
    }

    /// Queue an envelope for every member of the session except `exclude`.
    pub fn broadcast(&mut self, document_id: &str, envelope: &Envelope, exclude: Option<&str>) -> usize {
        let Some(session) = self.sessions.get(document_id) else {
            return 0;
        };
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} broadcast for {}: {}", envelope.kind, document_id, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for member in session.members() {
            if Some(member.as_str()) == exclude {
                continue;
            }
            match self.connections.get(member) {
                Some(conn) => {
                    if deliver(conn, text.clone(), &mut self.pending_dead) {
                        delivered += 1;
                    }
                }
                None => error!("Session {} lists {} but no such connection exists", document_id, member),
            }
        }
        delivered
    }

    /// Put the connection into `document_id`, leaving its current session first.
    pub fn join_document(&mut self, client_id: &str, document_id: &str, now: DateTime<Utc>) -> Option<JoinResult> {
        let current = self.connections.get(client_id)?.document_id.clone();

        let left = match current.as_deref() {
            Some(doc) if doc == document_id => None,
            Some(_) => self.leave_document(client_id, now),
            None => None,
        };

        let newly_joined = self.sessions.join(document_id, client_id, now);
        self.connections.set_document(client_id, Some(document_id.to_string()));
        Some(JoinResult { newly_joined, left })
    }

    /// Take the connection out of its session, releasing any lock it holds.
    pub fn leave_document(&mut self, client_id: &str, now: DateTime<Utc>) -> Option<LeaveOutcome> {
        let document_id = self.connections.set_document(client_id, None)?;
        self.sessions.leave(&document_id, client_id, now)
    }

    /// Remove a connection and its session membership in one step.
    pub fn remove_connection(
        &mut self,
        client_id: &str,
        conn_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<(Connection, Option<LeaveOutcome>)> {
        let conn = self.connections.remove(client_id, conn_id)?;
        let left = conn
            .document_id
            .as_deref()
            .and_then(|doc| self.sessions.leave(doc, client_id, now));
        Some((conn, left))
    }

    /// Tell the remaining members that `client_id` has left.
    pub fn announce_departure(&mut self, client_id: &str, outcome: &LeaveOutcome) {
        if outcome.session_removed {
            return;
        }
        let notice = Envelope::new(MessageKind::Leave, client_id)
            .with_document(outcome.document_id.clone())
            .with_data(json!({
                "message": format!("User {} left the document", client_id),
                "lockReleased": outcome.released_lock,
            }));
        self.broadcast(&outcome.document_id, &notice, Some(client_id));
    }

    /// Disconnect path shared by close, error, timeout and overflow.
    /// Safe to call repeatedly; only the first call for a connection acts.
    pub fn teardown(&mut self, client_id: &str, conn_id: Uuid, code: u16, reason: &str, now: DateTime<Utc>) -> bool {
        let Some((conn, left)) = self.remove_connection(client_id, conn_id, now) else {
            debug!("Teardown of {} ({}) skipped: already gone", client_id, conn_id);
            return false;
        };
        conn.close(code, reason);
        if let Some(outcome) = left {
            if outcome.released_lock {
                info!("🔓 Lock on {} released by departure of {}", outcome.document_id, client_id);
            }
            self.announce_departure(client_id, &outcome);
        }
        info!(
            "❌ User {} disconnected after {}s ({})",
            client_id,
            (now - conn.connected_at).num_seconds(),
            reason
        );
        self.drain_dead(now);
        true
    }

    /// Tear down every connection whose queue failed during this step.
    pub fn drain_dead(&mut self, now: DateTime<Utc>) {
        while let Some((client_id, conn_id)) = self.pending_dead.pop() {
            self.teardown(&client_id, conn_id, CLOSE_POLICY, "Outbound queue overflow", now);
        }
    }

    /// Send `notice` to everyone, close every socket and drop all state.
    pub fn close_all(&mut self, notice: &Envelope, code: u16, reason: &str) -> usize {
        let text = notice.to_json().ok();
        let conns = self.connections.drain();
        for conn in &conns {
            if let Some(text) = &text {
                let _ = conn.send(Outbound::Text(text.clone()));
            }
            conn.close(code, reason);
        }
        self.sessions.clear();
        self.pending_dead.clear();
        conns.len()
    }
}

fn deliver(conn: &Connection, text: String, pending_dead: &mut Vec<(String, Uuid)>) -> bool {
    match conn.send(Outbound::Text(text)) {
        Ok(()) => true,
        Err(failure) => {
            match failure {
                SendFailure::QueueFull => warn!("Outbound queue full for {}, dropping connection", conn.client_id),
                SendFailure::Closed => debug!("Socket for {} already closed", conn.client_id),
            }
            pending_dead.push((conn.client_id.clone(), conn.conn_id));
            false
        }
    }
}
