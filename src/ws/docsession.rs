use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::models::{LockInfo, SessionInfoResponse};

/// Advisory edit lock on a document session.
#[derive(Clone, Debug, PartialEq)]
pub struct DocLock {
    pub holder: String,
    pub expiry: DateTime<Utc>,
}

impl DocLock {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LockOutcome {
    Granted {
        expiry: DateTime<Utc>,
        /// Holder whose lock was expired or overridden by this grant.
        previous_holder: Option<String>,
    },
    Denied {
        holder: String,
        expiry: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    UnknownSession(String),
    NotMember { document_id: String, client_id: String },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::UnknownSession(doc) => write!(f, "No session for document {}", doc),
            SessionError::NotMember { document_id, client_id } => {
                write!(f, "{} is not a member of document {}", client_id, document_id)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Result of a member leaving a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub document_id: String,
    pub released_lock: bool,
    pub session_removed: bool,
}

/// Sessions dropped, and idle sessions kept because they still have members.
#[derive(Debug, Default, PartialEq)]
pub struct ReapReport {
    pub removed: Vec<String>,
    pub idle_with_members: Vec<String>,
}

/// Collaborative state for one document.
#[derive(Debug)]
pub struct DocumentSession {
    id: String,
    members: HashSet<String>,
    version: u64,
    last_activity: DateTime<Utc>,
    emptied_at: Option<DateTime<Utc>>,
    lock: Option<DocLock>,
}

impl DocumentSession {
    fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            members: HashSet::new(),
            version: 0,
            last_activity: now,
            emptied_at: Some(now),
            lock: None,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn is_member(&self, client_id: &str) -> bool {
        self.members.contains(client_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.members.iter()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The lock, unless it has expired. An expired lock is void even before
    /// the sweeper clears it.
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<&DocLock> {
        self.lock.as_ref().filter(|lock| lock.is_valid_at(now))
    }

    pub fn to_info(&self, now: DateTime<Utc>) -> SessionInfoResponse {
        let mut members: Vec<String> = self.members.iter().cloned().collect();
        members.sort();
        SessionInfoResponse {
            document_id: self.id.clone(),
            members,
            version: self.version,
            last_activity: self.last_activity,
            lock: self.active_lock(now).map(|lock| LockInfo {
                holder: lock.holder.clone(),
                expiry: lock.expiry,
            }),
        }
    }

    fn grant(&mut self, client_id: &str, ttl: TimeDelta, now: DateTime<Utc>) -> LockOutcome {
        let requested = now + ttl;
        let (expiry, previous_holder) = match self.lock.take() {
            // Re-acquisition by the holder never shortens the lock.
            Some(lock) if lock.holder == client_id && lock.is_valid_at(now) => {
                (lock.expiry.max(requested), None)
            }
            Some(lock) if lock.holder == client_id => (requested, None),
            Some(lock) => (requested, Some(lock.holder)),
            None => (requested, None),
        };
        self.lock = Some(DocLock { holder: client_id.to_string(), expiry });
        LockOutcome::Granted { expiry, previous_holder }
    }
}

/// All document sessions, keyed by document identity.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, DocumentSession>,
    /// How long an empty session is kept. `None` drops it on last departure.
    empty_grace: Option<TimeDelta>,
}

impl SessionTable {
    pub fn new(empty_grace: Option<TimeDelta>) -> Self {
        Self {
            sessions: HashMap::new(),
            empty_grace,
        }
    }

    pub fn get_or_create(&mut self, document_id: &str, now: DateTime<Utc>) -> &DocumentSession {
        self.entry(document_id, now)
    }

    fn entry(&mut self, document_id: &str, now: DateTime<Utc>) -> &mut DocumentSession {
        self.sessions.entry(document_id.to_string()).or_insert_with(|| {
            debug!("Created session for document {}", document_id);
            DocumentSession::new(document_id, now)
        })
    }

    pub fn get(&self, document_id: &str) -> Option<&DocumentSession> {
        self.sessions.get(document_id)
    }

    /// Add a member. Returns false if it was already a member.
    pub fn join(&mut self, document_id: &str, client_id: &str, now: DateTime<Utc>) -> bool {
        let session = self.entry(document_id, now);
        session.last_activity = now;
        session.emptied_at = None;
        session.members.insert(client_id.to_string())
    }

    /// Remove a member, releasing its lock. Without an empty-session grace,
    /// the session is dropped as soon as it has no members left.
    pub fn leave(&mut self, document_id: &str, client_id: &str, now: DateTime<Utc>) -> Option<LeaveOutcome> {
        let session = self.sessions.get_mut(document_id)?;
        if !session.members.remove(client_id) {
            return None;
        }

        let released_lock = match &session.lock {
            Some(lock) if lock.holder == client_id => {
                session.lock = None;
                true
            }
            _ => false,
        };

        let mut session_removed = false;
        if session.members.is_empty() {
            if self.empty_grace.is_none() {
                self.sessions.remove(document_id);
                session_removed = true;
                debug!("Dropped empty session for document {}", document_id);
            } else {
                session.emptied_at = Some(now);
            }
        }

        Some(LeaveOutcome {
            document_id: document_id.to_string(),
            released_lock,
            session_removed,
        })
    }

    /// Grant the lock unless another member holds one that has not expired.
    pub fn try_acquire_lock(
        &mut self,
        document_id: &str,
        client_id: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, SessionError> {
        let session = self.member_session(document_id, client_id)?;
        if let Some(lock) = session.active_lock(now) {
            if lock.holder != client_id {
                return Ok(LockOutcome::Denied {
                    holder: lock.holder.clone(),
                    expiry: lock.expiry,
                });
            }
        }
        Ok(session.grant(client_id, ttl, now))
    }

    /// Grant the lock even if another member holds a valid one.
    pub fn acquire_lock_overriding(
        &mut self,
        document_id: &str,
        client_id: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, SessionError> {
        let session = self.member_session(document_id, client_id)?;
        Ok(session.grant(client_id, ttl, now))
    }

    fn member_session(&mut self, document_id: &str, client_id: &str) -> Result<&mut DocumentSession, SessionError> {
        let session = self
            .sessions
            .get_mut(document_id)
            .ok_or_else(|| SessionError::UnknownSession(document_id.to_string()))?;
        if !session.is_member(client_id) {
            return Err(SessionError::NotMember {
                document_id: document_id.to_string(),
                client_id: client_id.to_string(),
            });
        }
        Ok(session)
    }

    /// Bump the change counter and activity time.
    pub fn bump_version(&mut self, document_id: &str, now: DateTime<Utc>) -> Option<u64> {
        let session = self.sessions.get_mut(document_id)?;
        session.version += 1;
        session.last_activity = now;
        Some(session.version)
    }

    /// Clear locks whose expiry has passed. Returns `(document, holder)` pairs.
    pub fn expire_locks(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut expired = Vec::new();
        for session in self.sessions.values_mut() {
            let is_expired = session.lock.as_ref().is_some_and(|lock| !lock.is_valid_at(now));
            if is_expired {
                if let Some(lock) = session.lock.take() {
                    expired.push((session.id.clone(), lock.holder));
                }
            }
        }
        expired
    }

    /// Drop sessions that are empty and either idle past `idle_window` or
    /// empty longer than the grace. Sessions with members are never dropped.
    pub fn reap(&mut self, now: DateTime<Utc>, idle_window: TimeDelta) -> ReapReport {
        let mut report = ReapReport::default();
        let empty_grace = self.empty_grace;

        self.sessions.retain(|document_id, session| {
            let idle = now - session.last_activity > idle_window;
            if !session.is_empty() {
                if idle {
                    warn!(
                        "Session {} idle since {} still has {} member(s); keeping it",
                        document_id,
                        session.last_activity,
                        session.member_count()
                    );
                    report.idle_with_members.push(document_id.clone());
                }
                return true;
            }

            let grace_over = match (empty_grace, session.emptied_at) {
                (Some(grace), Some(emptied_at)) => now - emptied_at > grace,
                _ => false,
            };
            if idle || grace_over {
                info!("🧹 Reaping inactive session for document {}", document_id);
                report.removed.push(document_id.clone());
                false
            } else {
                true
            }
        });
        report
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentSession> {
        self.sessions.values()
    }

    pub fn active_lock_count(&self, now: DateTime<Utc>) -> usize {
        self.sessions.values().filter(|s| s.active_lock(now).is_some()).count()
    }

    pub(crate) fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl() -> TimeDelta {
        TimeDelta::minutes(5)
    }

    fn table_with(members: &[&str], now: DateTime<Utc>) -> SessionTable {
        let mut table = SessionTable::new(None);
        for m in members {
            table.join("doc1", m, now);
        }
        table
    }

    #[test]
    fn lock_denied_while_other_holder_is_valid() {
        let now = Utc::now();
        let mut table = table_with(&["alice", "bob"], now);

        let granted = table.try_acquire_lock("doc1", "alice", ttl(), now).unwrap();
        assert_eq!(granted, LockOutcome::Granted { expiry: now + ttl(), previous_holder: None });

        let denied = table.try_acquire_lock("doc1", "bob", ttl(), now + TimeDelta::seconds(10)).unwrap();
        assert_eq!(denied, LockOutcome::Denied { holder: "alice".into(), expiry: now + ttl() });
    }

    #[test]
    fn expired_lock_is_reassigned() {
        let now = Utc::now();
        let mut table = table_with(&["alice", "bob"], now);
        table.try_acquire_lock("doc1", "alice", ttl(), now).unwrap();

        let later = now + ttl() + TimeDelta::seconds(1);
        assert!(table.get("doc1").unwrap().active_lock(later).is_none());
        match table.try_acquire_lock("doc1", "bob", ttl(), later).unwrap() {
            LockOutcome::Granted { expiry, previous_holder } => {
                assert_eq!(expiry, later + ttl());
                assert_eq!(previous_holder.as_deref(), Some("alice"));
            }
            other => panic!("expected grant, got {:?}", other),
        }
    }

    #[test]
    fn reacquire_never_shortens_expiry() {
        let now = Utc::now();
        let mut table = table_with(&["alice"], now);
        table.try_acquire_lock("doc1", "alice", ttl(), now).unwrap();

        // A shorter TTL on refresh keeps the earlier expiry.
        let refreshed = table
            .try_acquire_lock("doc1", "alice", TimeDelta::seconds(30), now + TimeDelta::seconds(10))
            .unwrap();
        assert_eq!(refreshed, LockOutcome::Granted { expiry: now + ttl(), previous_holder: None });

        let extended = table.try_acquire_lock("doc1", "alice", ttl(), now + TimeDelta::minutes(1)).unwrap();
        assert_eq!(
            extended,
            LockOutcome::Granted { expiry: now + TimeDelta::minutes(1) + ttl(), previous_holder: None }
        );
    }

    #[test]
    fn leaving_holder_releases_lock() {
        let now = Utc::now();
        let mut table = table_with(&["alice", "bob"], now);
        table.try_acquire_lock("doc1", "alice", ttl(), now).unwrap();

        let outcome = table.leave("doc1", "alice", now).unwrap();
        assert!(outcome.released_lock);
        assert!(!outcome.session_removed);

        let granted = table.try_acquire_lock("doc1", "bob", ttl(), now).unwrap();
        assert!(matches!(granted, LockOutcome::Granted { previous_holder: None, .. }));
    }

    #[test]
    fn non_members_cannot_lock() {
        let now = Utc::now();
        let mut table = table_with(&["alice"], now);
        assert_eq!(
            table.try_acquire_lock("doc1", "mallory", ttl(), now),
            Err(SessionError::NotMember { document_id: "doc1".into(), client_id: "mallory".into() })
        );
        assert_eq!(
            table.try_acquire_lock("nope", "alice", ttl(), now),
            Err(SessionError::UnknownSession("nope".into()))
        );
    }

    #[test]
    fn last_departure_drops_session_without_grace() {
        let now = Utc::now();
        let mut table = table_with(&["alice"], now);
        table.bump_version("doc1", now);
        table.bump_version("doc1", now);

        let outcome = table.leave("doc1", "alice", now).unwrap();
        assert!(outcome.session_removed);
        assert!(table.get("doc1").is_none());

        let fresh = table.get_or_create("doc1", now);
        assert_eq!(fresh.version(), 0);
        assert!(fresh.is_empty());
    }

    #[test]
    fn grace_keeps_empty_session_until_reaped() {
        let now = Utc::now();
        let mut table = SessionTable::new(Some(TimeDelta::minutes(2)));
        table.join("doc1", "alice", now);
        table.bump_version("doc1", now);

        let outcome = table.leave("doc1", "alice", now).unwrap();
        assert!(!outcome.session_removed);
        assert_eq!(table.get("doc1").unwrap().version(), 1);

        let report = table.reap(now + TimeDelta::minutes(1), TimeDelta::hours(1));
        assert!(report.removed.is_empty());

        let report = table.reap(now + TimeDelta::minutes(3), TimeDelta::hours(1));
        assert_eq!(report.removed, vec!["doc1".to_string()]);
        assert!(table.is_empty());
    }

    #[test]
    fn reaper_never_drops_sessions_with_members() {
        let now = Utc::now();
        let mut table = table_with(&["alice"], now);
        table.get_or_create("orphan", now);

        let report = table.reap(now + TimeDelta::hours(2), TimeDelta::hours(1));
        assert_eq!(report.removed, vec!["orphan".to_string()]);
        assert_eq!(report.idle_with_members, vec!["doc1".to_string()]);
        assert!(table.get("doc1").is_some());
    }

    #[test]
    fn version_only_grows() {
        let now = Utc::now();
        let mut table = table_with(&["alice"], now);
        let versions: Vec<u64> = (0..5).filter_map(|_| table.bump_version("doc1", now)).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(table.bump_version("missing", now), None);
    }

    #[test]
    fn expire_locks_clears_only_expired() {
        let now = Utc::now();
        let mut table = table_with(&["alice"], now);
        table.join("doc2", "bob", now);
        table.try_acquire_lock("doc1", "alice", TimeDelta::seconds(10), now).unwrap();
        table.try_acquire_lock("doc2", "bob", ttl(), now).unwrap();

        let expired = table.expire_locks(now + TimeDelta::seconds(11));
        assert_eq!(expired, vec![("doc1".to_string(), "alice".to_string())]);
        assert_eq!(table.active_lock_count(now + TimeDelta::seconds(11)), 1);
    }
}
