use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// A frame queued for delivery to one client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Why a queued send did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The client is not draining its queue fast enough.
    QueueFull,
    /// The socket task is gone.
    Closed,
}

/// One live client link, owned by the [`ConnectionRegistry`].
#[derive(Debug)]
pub struct Connection {
    pub client_id: String,
    pub conn_id: Uuid,
    pub document_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    outbound: mpsc::Sender<Outbound>,
    closer: CancellationToken,
}

impl Connection {
    /// Queue a frame without waiting.
    pub fn send(&self, frame: Outbound) -> Result<(), SendFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::QueueFull,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Ask the socket task to close. The close frame is best effort.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.send(Outbound::Close { code, reason: reason.to_string() });
        self.closer.cancel();
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_activity
    }
}

/// The socket side of an admitted connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub client_id: String,
    pub conn_id: Uuid,
    pub outbound: mpsc::Receiver<Outbound>,
    pub closed: CancellationToken,
}

/// Connections idle past the soft or the hard threshold.
#[derive(Debug, Default, PartialEq)]
pub struct IdleConnections {
    pub stale: Vec<String>,
    pub dead: Vec<(String, Uuid)>,
}

/// Every live connection, keyed by client identity.
///
/// A client identity maps to at most one connection. Operations that take a
/// `conn_id` only act when it matches the current connection for that
/// identity, so a late event from a replaced socket is a no-op.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: HashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `client_id`, returning the handle for the
    /// socket task and the connection it replaced, if any.
    pub fn admit(
        &mut self,
        client_id: &str,
        queue_capacity: usize,
        now: DateTime<Utc>,
    ) -> (ConnectionHandle, Option<Connection>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let closer = CancellationToken::new();
        let conn_id = Uuid::new_v4();

        let conn = Connection {
            client_id: client_id.to_string(),
            conn_id,
            document_id: None,
            connected_at: now,
            last_activity: now,
            active: true,
            outbound: tx,
            closer: closer.clone(),
        };
        let replaced = self.conns.insert(client_id.to_string(), conn);
        if let Some(old) = &replaced {
            debug!("Connection {} for {} replaced by {}", old.conn_id, client_id, conn_id);
        }

        let handle = ConnectionHandle {
            client_id: client_id.to_string(),
            conn_id,
            outbound: rx,
            closed: closer,
        };
        (handle, replaced)
    }

    /// Record inbound activity. Returns false when the connection is unknown.
    pub fn touch(&mut self, client_id: &str, conn_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.get_current_mut(client_id, conn_id) {
            Some(conn) => {
                conn.last_activity = now;
                conn.active = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<&Connection> {
        self.conns.get(client_id)
    }

    pub fn get_current(&self, client_id: &str, conn_id: Uuid) -> Option<&Connection> {
        self.conns.get(client_id).filter(|c| c.conn_id == conn_id)
    }

    fn get_current_mut(&mut self, client_id: &str, conn_id: Uuid) -> Option<&mut Connection> {
        self.conns.get_mut(client_id).filter(|c| c.conn_id == conn_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.conns.contains_key(client_id)
    }

    /// Set or clear the joined document. Returns the previous value.
    pub(crate) fn set_document(&mut self, client_id: &str, document_id: Option<String>) -> Option<String> {
        match self.conns.get_mut(client_id) {
            Some(conn) => std::mem::replace(&mut conn.document_id, document_id),
            None => None,
        }
    }

    /// Remove the connection. Membership cleanup is the caller's job, see
    /// [`super::syncstate::SyncState::remove_connection`].
    pub(crate) fn remove(&mut self, client_id: &str, conn_id: Uuid) -> Option<Connection> {
        if self.get_current(client_id, conn_id).is_some() {
            self.conns.remove(client_id)
        } else {
            None
        }
    }

    /// Classify idle connections. A connection past `hard` is only reported
    /// as dead, not also as stale.
    pub fn list_stale(&self, now: DateTime<Utc>, idle: TimeDelta, hard: TimeDelta) -> IdleConnections {
        let mut report = IdleConnections::default();
        for conn in self.conns.values() {
            let idle_for = conn.idle_for(now);
            if idle_for > hard {
                report.dead.push((conn.client_id.clone(), conn.conn_id));
            } else if idle_for > idle {
                report.stale.push(conn.client_id.clone());
            }
        }
        report
    }

    /// Clear the liveness flag. Returns how many were newly marked.
    pub fn mark_stale(&mut self, client_ids: &[String]) -> usize {
        let mut marked = 0;
        for id in client_ids {
            if let Some(conn) = self.conns.get_mut(id) {
                if conn.active {
                    conn.active = false;
                    marked += 1;
                }
            }
        }
        marked
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn stale_count(&self) -> usize {
        self.conns.values().filter(|c| !c.active).count()
    }

    pub(crate) fn drain(&mut self) -> Vec<Connection> {
        self.conns.drain().map(|(_, conn)| conn).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_ignores_replaced_connection() {
        let now = Utc::now();
        let mut registry = ConnectionRegistry::new();
        let (first, _) = registry.admit("alice", 8, now);
        let (second, replaced) = registry.admit("alice", 8, now);

        assert_eq!(replaced.map(|c| c.conn_id), Some(first.conn_id));
        assert_eq!(registry.len(), 1);
        assert!(!registry.touch("alice", first.conn_id, now));
        assert!(registry.touch("alice", second.conn_id, now));
        assert!(registry.remove("alice", first.conn_id).is_none());
        assert!(registry.contains("alice"));
    }

    #[test]
    fn unknown_identity_is_a_no_op() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.touch("ghost", Uuid::new_v4(), Utc::now()));
        assert!(registry.remove("ghost", Uuid::new_v4()).is_none());
        assert_eq!(registry.set_document("ghost", Some("doc".into())), None);
    }

    #[test]
    fn list_stale_uses_strict_thresholds() {
        let start = Utc::now();
        let mut registry = ConnectionRegistry::new();
        registry.admit("fresh", 8, start);
        registry.admit("idle", 8, start - TimeDelta::seconds(90));
        registry.admit("gone", 8, start - TimeDelta::minutes(6));
        registry.admit("edge", 8, start - TimeDelta::seconds(60));

        let report = registry.list_stale(start, TimeDelta::seconds(60), TimeDelta::minutes(5));
        assert_eq!(report.stale, vec!["idle".to_string()]);
        assert_eq!(report.dead.len(), 1);
        assert_eq!(report.dead[0].0, "gone");
    }

    #[test]
    fn touch_revives_stale_connection() {
        let now = Utc::now();
        let mut registry = ConnectionRegistry::new();
        let (handle, _) = registry.admit("alice", 8, now);
        assert_eq!(registry.mark_stale(&["alice".to_string()]), 1);
        assert_eq!(registry.stale_count(), 1);

        registry.touch("alice", handle.conn_id, now);
        assert_eq!(registry.stale_count(), 0);
    }

    #[test]
    fn send_reports_full_queue_and_closed_socket() {
        let mut registry = ConnectionRegistry::new();
        let (handle, _) = registry.admit("alice", 1, Utc::now());
        let conn = registry.get("alice").unwrap();

        assert_eq!(conn.send(Outbound::Text("a".into())), Ok(()));
        assert_eq!(conn.send(Outbound::Text("b".into())), Err(SendFailure::QueueFull));

        drop(handle);
        let conn = registry.get("alice").unwrap();
        assert_eq!(conn.send(Outbound::Text("c".into())), Err(SendFailure::Closed));
    }

    #[test]
    fn close_cancels_the_socket_token() {
        let mut registry = ConnectionRegistry::new();
        let (mut handle, _) = registry.admit("alice", 4, Utc::now());
        registry.get("alice").unwrap().close(1000, "bye");

        assert!(handle.closed.is_cancelled());
        assert_eq!(
            handle.outbound.try_recv().ok(),
            Some(Outbound::Close { code: 1000, reason: "bye".into() })
        );
    }
}
