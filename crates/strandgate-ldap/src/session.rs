//! Sessions and the per-listener session registry.
//!
//! A session is keyed by a [`ConnectionId`] derived from the connection's
//! local and remote endpoints. Each listener owns one [`SessionRegistry`];
//! registries never share state. Session numbers are assigned from a counter
//! owned by the registry, with the sign telling the listeners apart:
//! plaintext sessions count up from `1`, TLS sessions count down from `-1`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use strandgate_core::utils::connection_fingerprint;
use tracing::debug;

use crate::metrics;

/// Which endpoint a session arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Plaintext LDAP
    Plain,
    /// LDAP over TLS
    Tls,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "ldap",
            Self::Tls => "ldaps",
        }
    }

    /// Apply this listener's sign to a sequence value
    pub fn session_number(&self, sequence: u64) -> i64 {
        let magnitude = sequence as i64;
        match self {
            Self::Plain => magnitude,
            Self::Tls => -magnitude,
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one transport connection.
///
/// Hex SHA-256 of the local endpoint string followed by the remote endpoint
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn derive(local: &str, remote: &str) -> Self {
        Self(connection_fingerprint(local, remote))
    }

    pub fn from_addrs(local: SocketAddr, remote: SocketAddr) -> Self {
        Self::derive(&local.to_string(), &remote.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: ConnectionId,
    /// Positive on the plaintext listener, negative on the TLS listener
    pub number: i64,
    pub listener: ListenerKind,
    /// DN of the last successful bind, empty until then
    pub bound_dn: String,
    /// Audit trail exchanged with the decision service
    pub strand: String,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    fn open(id: ConnectionId, number: i64, listener: ListenerKind) -> Self {
        Self {
            id,
            number,
            listener,
            bound_dn: String::new(),
            strand: open_marker(number),
            opened_at: Utc::now(),
        }
    }
}

/// Initial strand of a session
pub fn open_marker(number: i64) -> String {
    format!("open[{}] -> ", number)
}

struct RegistryState {
    sessions: HashMap<ConnectionId, Session>,
    /// Magnitude of the next session number
    next_sequence: u64,
}

/// Maps connection identities to sessions for one listener.
///
/// Every operation takes the registry lock for its whole duration and never
/// across an await point, so lookup, creation, numbering, and removal are
/// atomic with respect to each other.
pub struct SessionRegistry {
    kind: ListenerKind,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(kind: ListenerKind) -> Self {
        Self {
            kind,
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                next_sequence: 1,
            }),
        }
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Get the session for `id`, creating and numbering it on first sight.
    pub fn resolve(&self, id: &ConnectionId) -> Session {
        let mut state = self.state.lock();
        let session = Self::resolve_locked(self.kind, &mut state, id).clone();
        metrics::set_active_sessions(self.kind, state.sessions.len());
        session
    }

    /// Current snapshot of a session without creating it
    pub fn get(&self, id: &ConnectionId) -> Option<Session> {
        self.state.lock().sessions.get(id).cloned()
    }

    /// Mutate a session in place. Returns the updated snapshot, or `None` if
    /// the session was removed in the meantime.
    pub fn update<F>(&self, id: &ConnectionId, f: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut state = self.state.lock();
        let session = state.sessions.get_mut(id)?;
        f(session);
        Some(session.clone())
    }

    /// Remove a session. Removing an absent identity is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Session> {
        let mut state = self.state.lock();
        let removed = state.sessions.remove(id);
        metrics::set_active_sessions(self.kind, state.sessions.len());
        removed
    }

    /// End a session: resolve it (creating one if the connection never sent
    /// a request), append `close` to its strand, and remove it. Returns the
    /// final state.
    pub fn close(&self, id: &ConnectionId) -> Session {
        let mut state = self.state.lock();
        let mut session = Self::resolve_locked(self.kind, &mut state, id).clone();
        session.strand.push_str("close");
        state.sessions.remove(id);
        metrics::set_active_sessions(self.kind, state.sessions.len());
        session
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve_locked<'a>(
        kind: ListenerKind,
        state: &'a mut RegistryState,
        id: &ConnectionId,
    ) -> &'a mut Session {
        let RegistryState {
            sessions,
            next_sequence,
        } = state;

        sessions.entry(id.clone()).or_insert_with(|| {
            let number = kind.session_number(*next_sequence);
            *next_sequence += 1;
            debug!(listener = %kind, session = number, "session opened");
            Session::open(id.clone(), number, kind)
        })
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionRegistry")
            .field("kind", &self.kind)
            .field("sessions", &state.sessions.len())
            .field("next_sequence", &state.next_sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn conn(port: u16) -> ConnectionId {
        ConnectionId::derive("127.0.0.1:3389", &format!("127.0.0.1:{}", port))
    }

    #[test]
    fn test_connection_id_is_deterministic() {
        let local: SocketAddr = "10.0.0.1:3389".parse().unwrap();
        let remote: SocketAddr = "10.0.0.2:41000".parse().unwrap();

        let a = ConnectionId::from_addrs(local, remote);
        let b = ConnectionId::derive("10.0.0.1:3389", "10.0.0.2:41000");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, ConnectionId::from_addrs(remote, local));
    }

    #[test]
    fn test_resolve_creates_seeded_session() {
        let registry = SessionRegistry::new(ListenerKind::Plain);
        let session = registry.resolve(&conn(50000));

        assert_eq!(session.number, 1);
        assert_eq!(session.listener, ListenerKind::Plain);
        assert_eq!(session.bound_dn, "");
        assert_eq!(session.strand, "open[1] -> ");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let registry = SessionRegistry::new(ListenerKind::Plain);
        let first = registry.resolve(&conn(50000));
        registry.update(&conn(50000), |s| s.bound_dn = "cn=ned".to_string());

        let again = registry.resolve(&conn(50000));
        assert_eq!(again.number, first.number);
        assert_eq!(again.bound_dn, "cn=ned");
        assert_eq!(again.opened_at, first.opened_at);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_numbering_is_monotonic_per_listener() {
        let plain = SessionRegistry::new(ListenerKind::Plain);
        let tls = SessionRegistry::new(ListenerKind::Tls);

        let plain_numbers: Vec<i64> = (0..3).map(|i| plain.resolve(&conn(i)).number).collect();
        let tls_numbers: Vec<i64> = (0..3).map(|i| tls.resolve(&conn(i)).number).collect();

        assert_eq!(plain_numbers, vec![1, 2, 3]);
        assert_eq!(tls_numbers, vec![-1, -2, -3]);
        assert_eq!(tls.resolve(&conn(0)).strand, "open[-1] -> ");
    }

    #[test]
    fn test_numbers_are_not_reused_after_remove() {
        let registry = SessionRegistry::new(ListenerKind::Plain);
        assert_eq!(registry.resolve(&conn(1)).number, 1);
        registry.remove(&conn(1));
        assert_eq!(registry.resolve(&conn(1)).number, 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new(ListenerKind::Tls);
        assert!(registry.remove(&conn(1)).is_none());

        registry.resolve(&conn(1));
        assert!(registry.remove(&conn(1)).is_some());
        assert!(registry.remove(&conn(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_absent_session() {
        let registry = SessionRegistry::new(ListenerKind::Plain);
        assert!(registry.update(&conn(1), |s| s.strand.clear()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_appends_and_removes() {
        let registry = SessionRegistry::new(ListenerKind::Plain);
        registry.resolve(&conn(1));
        registry.update(&conn(1), |s| s.strand = "open[1] -> bind-ok -> ".to_string());

        let closed = registry.close(&conn(1));
        assert_eq!(closed.strand, "open[1] -> bind-ok -> close");
        assert!(registry.get(&conn(1)).is_none());
    }

    #[test]
    fn test_close_without_prior_session() {
        let registry = SessionRegistry::new(ListenerKind::Tls);
        let closed = registry.close(&conn(9));
        assert_eq!(closed.number, -1);
        assert_eq!(closed.strand, "open[-1] -> close");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_resolve_assigns_unique_numbers() {
        let registry = Arc::new(SessionRegistry::new(ListenerKind::Plain));

        let handles: Vec<_> = (0..8u16)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..50u16)
                        .map(|i| {
                            // Every thread also resolves a shared identity
                            registry.resolve(&conn(60000));
                            registry.resolve(&conn(t * 100 + i)).number
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut numbers = HashSet::new();
        for handle in handles {
            for number in handle.join().unwrap() {
                numbers.insert(number);
            }
        }

        let shared = registry.get(&conn(60000)).unwrap().number;
        assert_eq!(numbers.len(), 400);
        assert!(!numbers.contains(&shared));
        assert_eq!(registry.len(), 401);
        assert!(numbers.iter().all(|n| *n >= 1 && *n <= 401));
    }
}
