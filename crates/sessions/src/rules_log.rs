//! Ordered, de-duplicated log of rule references surfaced during a session.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

/// Append-only list of rule references.
///
/// Entries keep first-seen order and an exact string is never stored twice.
/// The only removal is [`ReferencedRules::clear`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferencedRules {
    entries: Vec<String>,
}

impl ReferencedRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `rule` unless it is empty or already present.
    /// Returns `true` when the log changed.
    pub fn add(&mut self, rule: impl Into<String>) -> bool {
        let rule = rule.into();
        if rule.is_empty() || self.entries.contains(&rule) {
            return false;
        }
        self.entries.push(rule);
        true
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.entries.iter().any(|r| r == rule)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Copy of the current entries; later appends are not reflected.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Handle to a session's [`ReferencedRules`], shared with the search tool.
///
/// Turns are strictly sequential, so the lock is never contended; it exists to
/// satisfy `Send + Sync` on the tool trait object.
#[derive(Debug, Clone, Default)]
pub struct SharedRulesLog {
    inner: Arc<Mutex<ReferencedRules>>,
}

impl SharedRulesLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReferencedRules> {
        // A panic while holding the guard cannot leave the Vec half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, rule: impl Into<String>) -> bool {
        self.lock().add(rule)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
