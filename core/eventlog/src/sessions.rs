//! Registry of live real-time sessions.
//!
//! A session must be registered before logging can start for it, and any
//! registered session blocks uploads globally.

use std::collections::BTreeSet;

use crate::types::SessionKey;

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: BTreeSet<SessionKey>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. Returns false if it was already registered.
    pub fn add(&mut self, key: SessionKey) -> bool {
        self.sessions.insert(key)
    }

    /// Forgets a session. Returns false if it was unknown.
    pub fn remove(&mut self, key: SessionKey) -> bool {
        self.sessions.remove(&key)
    }

    /// Forgets every session owned by `process_id`, returning the removed keys.
    pub fn remove_process(&mut self, process_id: u32) -> Vec<SessionKey> {
        let removed: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|key| key.process_id == process_id)
            .copied()
            .collect();
        for key in &removed {
            self.sessions.remove(key);
        }
        removed
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.sessions.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SessionKey> + '_ {
        self.sessions.iter().copied()
    }
}
