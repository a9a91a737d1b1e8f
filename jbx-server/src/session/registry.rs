//! Listener registry

use crate::error::{Error, Result};
use jbx_common::listener::ListenerSession;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Tracks every listener who joined the session. All operations run
/// under one lock; nothing here does async work.
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, ListenerSession>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Add a listener, or return the existing id when a non-kicked
    /// session with the same non-empty external id already exists
    /// (idempotent rejoin for bot-bridged users).
    pub fn join(&self, display_name: &str, external_user_id: &str, vip: bool) -> String {
        let mut listeners = self.listeners.lock().unwrap();

        if !external_user_id.is_empty() {
            if let Some(existing) = listeners
                .values()
                .find(|s| s.external_user_id == external_user_id && !s.kicked)
            {
                return existing.id.clone();
            }
        }

        let id = Uuid::new_v4().to_string();
        let session = ListenerSession::new(
            id.clone(),
            display_name.to_string(),
            external_user_id.to_string(),
            vip,
        );
        listeners.insert(id.clone(), session);
        id
    }

    /// Fetch a snapshot of a listener session.
    pub fn get(&self, listener_id: &str) -> Result<ListenerSession> {
        let listeners = self.listeners.lock().unwrap();
        listeners
            .get(listener_id)
            .cloned()
            .ok_or(Error::InvalidListener)
    }

    /// Check that a listener exists and has not been kicked.
    pub fn validate(&self, listener_id: &str) -> Result<()> {
        let listeners = self.listeners.lock().unwrap();
        let session = listeners.get(listener_id).ok_or(Error::InvalidListener)?;
        if session.kicked {
            return Err(Error::ListenerKicked);
        }
        Ok(())
    }

    /// Mark a listener as kicked.
    pub fn kick(&self, listener_id: &str) -> Result<()> {
        let mut listeners = self.listeners.lock().unwrap();
        let session = listeners
            .get_mut(listener_id)
            .ok_or(Error::InvalidListener)?;
        session.kick();
        Ok(())
    }

    /// Record an accepted request for the listener.
    pub fn increment_pending(&self, listener_id: &str) -> Result<()> {
        let mut listeners = self.listeners.lock().unwrap();
        let session = listeners
            .get_mut(listener_id)
            .ok_or(Error::InvalidListener)?;
        session.increment_pending();
        Ok(())
    }

    /// Record that a listener's request started playing. Unknown ids and
    /// zero counts are no-ops.
    pub fn decrement_pending(&self, listener_id: &str) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(session) = listeners.get_mut(listener_id) {
            session.decrement_pending();
        }
    }

    /// Snapshot of every listener session.
    pub fn all(&self) -> Vec<ListenerSession> {
        self.listeners.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
