//! Per-session conversation state: message history, the referenced-rules log,
//! and a broadcast bus announcing session changes to front ends.

pub mod rules_log;
pub mod session_events;
pub mod store;

pub use {
    rules_log::{ReferencedRules, SharedRulesLog},
    session_events::{SessionEvent, SessionEventBus},
    store::{SessionStore, new_session_id},
};
