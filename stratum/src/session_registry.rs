// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

//! Registry of live miner sessions.
//!
//! All sessions live in one map behind one exclusive lock. Readers and
//! writers both take the full lock, and no critical section performs I/O:
//! operations that lead to network writes hand back channel senders or
//! snapshots and the caller writes after the lock is released.

use crate::error::Error;
use crate::session::{Session, SessionId};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Buffer size for channels to send messages to a client.
pub const MSG_CHANNEL_SIZE: usize = 32;

/// Outbound message channel to one session's connection task.
pub type MessageSender = mpsc::Sender<Arc<String>>;

/// Channel ends handed to the connection task of a new session.
#[derive(Debug)]
pub struct SessionChannels {
    /// Messages to write to the miner
    pub message_rx: mpsc::Receiver<Arc<String>>,
    /// Fires when the registry evicts the session
    pub shutdown_rx: oneshot::Receiver<()>,
}

struct Entry {
    session: Session,
    message_tx: MessageSender,
    shutdown_tx: oneshot::Sender<()>,
}

struct Sessions {
    entries: BTreeMap<SessionId, Entry>,
    /// Next id to hand out. None once the id space is used up.
    next_id: Option<u32>,
}

/// The single source of truth for session state.
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
    extranonce2_size: u32,
    start_difficulty: f64,
    /// Accepted username/password pairs. None accepts any username.
    credentials: Option<HashMap<String, String>>,
}

impl SessionRegistry {
    /// Create a registry. Session ids start at a random point below 2^31 and
    /// count upwards, so an id is never handed out twice.
    pub fn new(
        extranonce2_size: u32,
        start_difficulty: f64,
        credentials: Option<HashMap<String, String>>,
    ) -> Self {
        let first_id = rand::thread_rng().gen_range(0..(1u32 << 31));
        Self::with_first_id(first_id, extranonce2_size, start_difficulty, credentials)
    }

    pub fn with_first_id(
        first_id: u32,
        extranonce2_size: u32,
        start_difficulty: f64,
        credentials: Option<HashMap<String, String>>,
    ) -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                entries: BTreeMap::new(),
                next_id: Some(first_id),
            }),
            extranonce2_size,
            start_difficulty,
            credentials,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session with a fresh id and return it with its channel ends.
    pub fn register(
        &self,
        user_agent: &str,
        now: SystemTime,
    ) -> Result<(Session, SessionChannels), Error> {
        let (message_tx, message_rx) = mpsc::channel(MSG_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut sessions = self.lock();
        let id = sessions.next_id.ok_or(Error::SessionIdsExhausted)?;
        sessions.next_id = id.checked_add(1);

        let session = Session::new(
            SessionId(id),
            user_agent.to_string(),
            self.extranonce2_size,
            self.start_difficulty,
            now,
        );
        sessions.entries.insert(
            session.id,
            Entry {
                session: session.clone(),
                message_tx,
                shutdown_tx,
            },
        );
        drop(sessions);

        debug!("Registered session {} for {user_agent:?}", session.id);
        Ok((
            session,
            SessionChannels {
                message_rx,
                shutdown_rx,
            },
        ))
    }

    fn credentials_match(&self, username: &str, password: Option<&str>) -> bool {
        match &self.credentials {
            None => true,
            Some(credentials) => credentials
                .get(username)
                .is_some_and(|expected| expected == password.unwrap_or_default()),
        }
    }

    /// Mark a session authorized as `username`.
    ///
    /// Fails without touching the session when the credentials are wrong,
    /// the session is gone, or it already authorized under another name.
    pub fn authorize(&self, id: SessionId, username: &str, password: Option<&str>) -> bool {
        if username.is_empty() || !self.credentials_match(username, password) {
            return false;
        }
        let mut sessions = self.lock();
        let Some(entry) = sessions.entries.get_mut(&id) else {
            return false;
        };
        match &entry.session.name {
            Some(name) if name != username => false,
            _ => {
                entry.session.name = Some(username.to_string());
                entry.session.authorized = true;
                true
            }
        }
    }

    /// Record activity on a session.
    pub fn touch(&self, id: SessionId, now: SystemTime) {
        if let Some(entry) = self.lock().entries.get_mut(&id) {
            entry.session.last_activity = now;
        }
    }

    /// Evict sessions idle for longer than `timeout`.
    ///
    /// Evicted sessions are removed and their connections signalled to
    /// close. Returns the evicted ids.
    pub fn sweep(&self, timeout: Duration, now: SystemTime) -> Vec<SessionId> {
        let evicted: Vec<Entry> = {
            let mut sessions = self.lock();
            let idle: Vec<SessionId> = sessions
                .entries
                .values()
                .filter(|entry| entry.session.idle_for(now) > timeout)
                .map(|entry| entry.session.id)
                .collect();
            idle.iter()
                .filter_map(|id| sessions.entries.remove(id))
                .collect()
        };

        evicted
            .into_iter()
            .map(|entry| {
                info!("Evicting idle session {}", entry.session.id);
                // The connection may have closed already
                let _ = entry.shutdown_tx.send(());
                entry.session.id
            })
            .collect()
    }

    /// Point-in-time copy of all sessions, ordered by session id.
    pub fn snapshot(&self) -> Vec<Session> {
        self.lock()
            .entries
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Outbound channels of all authorized sessions, ordered by session id.
    pub fn authorized_senders(&self) -> Vec<(SessionId, MessageSender)> {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.session.authorized)
            .map(|entry| (entry.session.id, entry.message_tx.clone()))
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.lock().entries.get(&id).map(|entry| entry.session.clone())
    }

    pub fn sender(&self, id: SessionId) -> Option<MessageSender> {
        self.lock().entries.get(&id).map(|entry| entry.message_tx.clone())
    }

    /// Apply a new difficulty and return the session's channel to announce it on.
    pub fn set_difficulty(&self, id: SessionId, difficulty: f64) -> Option<MessageSender> {
        let mut sessions = self.lock();
        let entry = sessions.entries.get_mut(&id)?;
        entry.session.current_difficulty = difficulty;
        Some(entry.message_tx.clone())
    }

    pub fn set_version_mask(&self, id: SessionId, mask: u32) -> bool {
        match self.lock().entries.get_mut(&id) {
            Some(entry) => {
                entry.session.version_mask = Some(mask);
                true
            }
            None => false,
        }
    }

    /// Drop a session whose connection ended. Returns false if it was already gone.
    pub fn remove(&self, id: SessionId) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::with_first_id(100, 8, 1.0, None)
    }

    #[test]
    fn test_register_assigns_fresh_ids() {
        let registry = registry();
        let now = SystemTime::now();

        let (first, _channels1) = registry.register("cgminer", now).unwrap();
        let (second, _channels2) = registry.register("bfgminer", now).unwrap();

        assert_eq!(first.id, SessionId(100));
        assert_eq!(second.id, SessionId(101));
        assert_eq!(first.extranonce2_size, 8);
        assert_eq!(registry.len(), 2);

        // Ids are not reused after removal
        assert!(registry.remove(first.id));
        let (third, _channels3) = registry.register("cgminer", now).unwrap();
        assert_eq!(third.id, SessionId(102));
    }

    #[test]
    fn test_register_exhausts_ids() {
        let registry = SessionRegistry::with_first_id(u32::MAX, 8, 1.0, None);
        let now = SystemTime::now();
        assert!(registry.register("a", now).is_ok());
        assert!(matches!(
            registry.register("b", now),
            Err(Error::SessionIdsExhausted)
        ));
    }

    #[test]
    fn test_random_first_id_is_below_2_pow_31() {
        let registry = SessionRegistry::new(8, 1.0, None);
        let (session, _channels) = registry.register("a", SystemTime::now()).unwrap();
        assert!(session.id.0 < (1 << 31));
    }

    #[test]
    fn test_authorize() {
        let registry = registry();
        let (session, _channels) = registry.register("cgminer", SystemTime::now()).unwrap();

        assert!(registry.authorize(session.id, "alice", None));
        let stored = registry.get(session.id).unwrap();
        assert!(stored.authorized);
        assert_eq!(stored.name.as_deref(), Some("alice"));

        // Same name again is fine, another name is not
        assert!(registry.authorize(session.id, "alice", None));
        assert!(!registry.authorize(session.id, "bob", None));
        assert_eq!(registry.get(session.id).unwrap().name.as_deref(), Some("alice"));

        assert!(!registry.authorize(SessionId(9999), "alice", None));
    }

    #[test]
    fn test_authorize_with_credentials() {
        let credentials = HashMap::from([("alice".to_string(), "secret".to_string())]);
        let registry = SessionRegistry::with_first_id(1, 8, 1.0, Some(credentials));
        let (session, _channels) = registry.register("cgminer", SystemTime::now()).unwrap();

        assert!(!registry.authorize(session.id, "alice", Some("wrong")));
        assert!(!registry.authorize(session.id, "mallory", Some("secret")));
        assert!(!registry.get(session.id).unwrap().authorized);

        assert!(registry.authorize(session.id, "alice", Some("secret")));
        assert!(registry.get(session.id).unwrap().authorized);
    }

    #[test]
    fn test_sweep_evicts_once() {
        let registry = registry();
        let start = SystemTime::now();
        let (idle, mut idle_channels) = registry.register("idle", start).unwrap();
        let (active, mut active_channels) = registry.register("active", start).unwrap();

        let later = start + Duration::from_secs(120);
        registry.touch(active.id, later);

        let evicted = registry.sweep(Duration::from_secs(60), later);
        assert_eq!(evicted, vec![idle.id]);
        assert!(registry.get(idle.id).is_none());
        assert!(registry.get(active.id).is_some());
        assert!(idle_channels.shutdown_rx.try_recv().is_ok());
        assert!(active_channels.shutdown_rx.try_recv().is_err());

        // A second sweep finds nothing more to do
        assert!(registry.sweep(Duration::from_secs(60), later).is_empty());
        assert!(!registry.remove(idle.id));
    }

    #[test]
    fn test_sweep_with_closed_connection() {
        let registry = registry();
        let start = SystemTime::now();
        let (session, channels) = registry.register("gone", start).unwrap();
        drop(channels);

        let evicted = registry.sweep(Duration::from_secs(1), start + Duration::from_secs(5));
        assert_eq!(evicted, vec![session.id]);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let registry = registry();
        let now = SystemTime::now();
        let mut channels = Vec::new();
        for agent in ["c", "a", "b"] {
            channels.push(registry.register(agent, now).unwrap().1);
        }
        let ids: Vec<SessionId> = registry.snapshot().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId(100), SessionId(101), SessionId(102)]);
    }

    #[test]
    fn test_authorized_senders() {
        let registry = registry();
        let now = SystemTime::now();
        let (first, mut first_channels) = registry.register("a", now).unwrap();
        let (_second, mut second_channels) = registry.register("b", now).unwrap();
        registry.authorize(first.id, "alice", None);

        let senders = registry.authorized_senders();
        assert_eq!(senders.len(), 1);
        assert_eq!(senders[0].0, first.id);

        let message = Arc::new("hello".to_string());
        senders[0].1.try_send(message.clone()).unwrap();
        assert_eq!(first_channels.message_rx.try_recv().unwrap(), message);
        assert!(second_channels.message_rx.try_recv().is_err());
    }

    #[test]
    fn test_set_difficulty_and_version_mask() {
        let registry = registry();
        let (session, _channels) = registry.register("a", SystemTime::now()).unwrap();

        assert!(registry.set_difficulty(session.id, 64.0).is_some());
        assert!(registry.set_version_mask(session.id, 0x1fffe000));
        let stored = registry.get(session.id).unwrap();
        assert_eq!(stored.current_difficulty, 64.0);
        assert_eq!(stored.version_mask, Some(0x1fffe000));

        assert!(registry.set_difficulty(SessionId(1), 2.0).is_none());
        assert!(!registry.set_version_mask(SessionId(1), 0));
    }
}
