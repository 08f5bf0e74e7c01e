//! In-memory message history keyed by session id.
//!
//! Messages are stored as JSON values so this crate stays independent of the
//! agent's message type. Nothing is persisted; history lives as long as the
//! store does.

use std::collections::HashMap;

use tracing::debug;

/// Generate a fresh opaque session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Vec<serde_json::Value>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full history for `session_id`; empty for unknown sessions.
    pub fn read(&self, session_id: &str) -> Vec<serde_json::Value> {
        self.sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Replace the history of `session_id`.
    pub fn replace(&mut self, session_id: &str, messages: Vec<serde_json::Value>) {
        debug!(session_id, count = messages.len(), "session history replaced");
        self.sessions.insert(session_id.to_string(), messages);
    }
}
