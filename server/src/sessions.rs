//! Connected client sessions and their transport addresses
//!
//! This module tracks which sessions are currently connected:
//! - Session lifecycle (connect, reconnect, disconnect, timeout)
//! - Mapping between session ids and the UDP addresses they speak from
//! - Capacity limits and liveness tracking
//!
//! The registry itself never talks to the network. The server broadcasts the
//! member list after every lifecycle change.

use log::info;
use shared::SessionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};

/// A connected client as seen by the transport
#[derive(Debug)]
pub struct Session {
    /// Identifier assigned by the server
    pub id: SessionId,
    /// Where replies and pushes for this session go
    pub addr: SocketAddr,
    /// Last time any packet arrived from this session
    pub last_seen: Instant,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if nothing was heard from the session within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Set of currently connected sessions
///
/// Adds and removes are visible to the next `members()` call; the relay
/// reads that snapshot to decide who receives a command.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    /// Next id handed out on a fresh connect
    next_session_id: SessionId,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry; ids start at 1
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            max_sessions,
        }
    }

    /// Registers a new session for `addr`
    ///
    /// Fails with `ServerFull` once `max_sessions` are connected and with
    /// `AddressInUse` if `addr` already speaks for a session.
    pub fn on_connect(&mut self, addr: SocketAddr) -> Result<SessionId> {
        if self.sessions.len() >= self.max_sessions {
            return Err(SyncError::ServerFull);
        }
        if self.find_by_addr(addr).is_some() {
            return Err(SyncError::AddressInUse(addr));
        }

        let session_id = self.allocate_id()?;

        info!("Session {} connected from {}", session_id, addr);
        self.sessions
            .insert(session_id, Session::new(session_id, addr));

        Ok(session_id)
    }

    /// Next free id, skipping ids reclaimed through reconnect
    fn allocate_id(&mut self) -> Result<SessionId> {
        let mut session_id = self.next_session_id;
        while self.sessions.contains_key(&session_id) {
            session_id = session_id
                .checked_add(1)
                .ok_or(SyncError::SessionIdsExhausted)?;
        }

        self.next_session_id = session_id
            .checked_add(1)
            .ok_or(SyncError::SessionIdsExhausted)?;
        Ok(session_id)
    }

    /// Re-registers a known session id
    ///
    /// Idempotent from the session's own address: it just refreshes
    /// liveness. A live session cannot be taken over from another address,
    /// and an address cannot hold two sessions.
    pub fn on_reconnect(&mut self, session_id: SessionId, addr: SocketAddr) -> Result<()> {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            if session.addr != addr {
                return Err(SyncError::SessionInUse(session_id));
            }
            session.last_seen = Instant::now();
            return Ok(());
        }

        if self.find_by_addr(addr).is_some() {
            return Err(SyncError::AddressInUse(addr));
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(SyncError::ServerFull);
        }

        // Keep fresh ids clear of the one the client brought back
        let after = session_id
            .checked_add(1)
            .ok_or(SyncError::UnknownSession(session_id))?;
        self.next_session_id = self.next_session_id.max(after);

        info!("Session {} reconnected from {}", session_id, addr);
        self.sessions
            .insert(session_id, Session::new(session_id, addr));
        Ok(())
    }

    /// Removes a session; returns false if it was already gone
    pub fn on_disconnect(&mut self, session_id: SessionId) -> bool {
        if let Some(session) = self.sessions.remove(&session_id) {
            info!("Session {} disconnected", session.id);
            true
        } else {
            false
        }
    }

    /// Sorted snapshot of connected session ids
    pub fn members(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn addr_of(&self, session_id: SessionId) -> Option<SocketAddr> {
        self.sessions.get(&session_id).map(|session| session.addr)
    }

    /// Finds the session speaking from `addr`
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|session| session.addr == addr)
            .map(|session| session.id)
    }

    /// Marks a session as alive; returns false for unknown ids
    pub fn touch(&mut self, session_id: SessionId) -> bool {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    /// Removes sessions silent for longer than `timeout` and returns their ids
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<SessionId> {
        let timed_out: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.id)
            .collect();

        for session_id in &timed_out {
            self.on_disconnect(*session_id);
        }

        timed_out
    }

    /// All (session id, address) pairs, for fan-out to every session
    pub fn session_addrs(&self) -> Vec<(SessionId, SocketAddr)> {
        self.sessions
            .values()
            .map(|session| (session.id, session.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_session_timeout() {
        let mut session = Session::new(1, test_addr());

        assert!(!session.is_timed_out(Duration::from_secs(1)));

        session.last_seen = Instant::now() - Duration::from_secs(2);

        assert!(session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_connect_assigns_sequential_ids() {
        let mut registry = SessionRegistry::new(3);

        assert_eq!(registry.on_connect(test_addr()), Ok(1));
        assert_eq!(registry.on_connect(test_addr2()), Ok(2));
        assert_eq!(registry.members(), vec![1, 2]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_connect_max_capacity() {
        let mut registry = SessionRegistry::new(1);

        assert!(registry.on_connect(test_addr()).is_ok());
        assert_eq!(registry.on_connect(test_addr2()), Err(SyncError::ServerFull));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_disconnect() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.on_connect(test_addr()).unwrap();

        assert!(registry.on_disconnect(id));
        assert!(registry.is_empty());
        assert!(registry.members().is_empty());
    }

    #[test]
    fn test_disconnect_unknown_is_harmless() {
        let mut registry = SessionRegistry::new(2);
        assert!(!registry.on_disconnect(999));
    }

    #[test]
    fn test_reconnect_is_idempotent() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.on_connect(test_addr()).unwrap();

        registry.on_reconnect(id, test_addr()).unwrap();
        registry.on_reconnect(id, test_addr()).unwrap();

        assert_eq!(registry.members(), vec![id]);
        assert_eq!(registry.addr_of(id), Some(test_addr()));
    }

    #[test]
    fn test_live_session_cannot_be_taken_over() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.on_connect(test_addr()).unwrap();

        assert_eq!(
            registry.on_reconnect(id, test_addr2()),
            Err(SyncError::SessionInUse(id))
        );
        assert_eq!(registry.addr_of(id), Some(test_addr()));
        assert_eq!(registry.find_by_addr(test_addr2()), None);
    }

    #[test]
    fn test_address_holds_one_session() {
        let mut registry = SessionRegistry::new(4);
        registry.on_connect(test_addr()).unwrap();

        assert_eq!(
            registry.on_reconnect(5, test_addr()),
            Err(SyncError::AddressInUse(test_addr()))
        );
        assert_eq!(
            registry.on_connect(test_addr()),
            Err(SyncError::AddressInUse(test_addr()))
        );
        assert_eq!(registry.members(), vec![1]);
    }

    #[test]
    fn test_reconnect_after_restart_reserves_id() {
        let mut registry = SessionRegistry::new(4);

        registry.on_reconnect(7, test_addr()).unwrap();
        let fresh = registry.on_connect(test_addr2()).unwrap();

        assert_eq!(fresh, 8);
        assert_eq!(registry.members(), vec![7, 8]);
    }

    #[test]
    fn test_connect_skips_reclaimed_ids() {
        let mut registry = SessionRegistry::new(4);

        registry.on_reconnect(2, test_addr()).unwrap();
        // Counter lagging behind a reclaimed id
        registry.next_session_id = 2;

        let fresh = registry.on_connect(test_addr2()).unwrap();

        assert_eq!(fresh, 3);
        assert_eq!(registry.members(), vec![2, 3]);
    }

    #[test]
    fn test_largest_id_cannot_exhaust_counter() {
        let mut registry = SessionRegistry::new(4);

        assert_eq!(
            registry.on_reconnect(SessionId::MAX, test_addr()),
            Err(SyncError::UnknownSession(SessionId::MAX))
        );
        assert!(registry.is_empty());

        registry.on_reconnect(SessionId::MAX - 1, test_addr()).unwrap();
        assert_eq!(
            registry.on_connect(test_addr2()),
            Err(SyncError::SessionIdsExhausted)
        );
        assert_eq!(registry.members(), vec![SessionId::MAX - 1]);
    }

    #[test]
    fn test_find_by_addr() {
        let mut registry = SessionRegistry::new(2);
        let id1 = registry.on_connect(test_addr()).unwrap();
        let _id2 = registry.on_connect(test_addr2()).unwrap();

        assert_eq!(registry.find_by_addr(test_addr()), Some(id1));

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(registry.find_by_addr(unknown), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut registry = SessionRegistry::new(2);
        let stale = registry.on_connect(test_addr()).unwrap();
        let fresh = registry.on_connect(test_addr2()).unwrap();

        if let Some(session) = registry.sessions.get_mut(&stale) {
            session.last_seen = Instant::now() - Duration::from_secs(30);
        }

        let removed = registry.check_timeouts(Duration::from_secs(10));

        assert_eq!(removed, vec![stale]);
        assert_eq!(registry.members(), vec![fresh]);
    }

    #[test]
    fn test_touch() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.on_connect(test_addr()).unwrap();

        assert!(registry.touch(id));
        assert!(!registry.touch(42));
        assert!(registry.contains(id));
    }
}
