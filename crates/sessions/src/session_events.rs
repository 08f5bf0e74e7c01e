//! Session event bus.
//!
//! A `tokio::sync::broadcast` channel carries lightweight [`SessionEvent`]
//! values so a front end can refresh its referenced-rules panel without
//! polling the assistant.

use tokio::sync::broadcast;

/// A change to a session that a front end may want to reflect.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Created { session_id: String },
    Cleared { session_id: String },
    RulesUpdated { session_id: String, count: usize },
}

/// Broadcast sender for [`SessionEvent`]s. Clones share one channel.
#[derive(Clone, Debug)]
pub struct SessionEventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEventBus {
    /// Bus holding at most 64 undelivered events per subscriber.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Publish `event` and return how many subscribers got it. Zero
    /// subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn clones_publish_into_the_same_channel() {
        let bus = SessionEventBus::new();
        let handle = bus.clone();
        let mut rx = bus.subscribe();

        handle.publish(SessionEvent::RulesUpdated {
            session_id: "table-1".into(),
            count: 3,
        });
        bus.publish(SessionEvent::Cleared {
            session_id: "table-1".into(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::RulesUpdated { count: 3, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::Cleared { session_id } if session_id == "table-1"
        ));
    }

    #[test]
    fn unobserved_events_are_dropped() {
        let bus = SessionEventBus::default();
        let delivered = bus.publish(SessionEvent::Created {
            session_id: "nobody-listening".into(),
        });
        assert_eq!(delivered, 0);

        // A late subscriber only sees what comes after it.
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
