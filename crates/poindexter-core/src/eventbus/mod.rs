//! Event Bus (C2): in-process publish/subscribe, fanned out to whoever is
//! listening (the CLI's TUI, the HTTP server's WebSocket route).
//!
//! Delivery is best-effort within the process: a subscriber that falls far
//! enough behind loses its oldest unread events rather than blocking the
//! publisher (`tokio::sync::broadcast`'s lag semantics). There is no
//! ordering guarantee across different task ids, but events for the same
//! `(task_id, type prefix)` are always published in the order the caller
//! made them, giving FIFO per task per prefix as §4.6 requires.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity: how many events a lagging subscriber can fall
/// behind before it starts missing them.
const DEFAULT_CAPACITY: usize = 1024;

/// One event on the bus. `event_type` is a stable dotted string
/// (`task.completed`, `session.tool-call`, `approval.required`, ...);
/// subscribers filter on it by prefix. `task_id` is `None` for events that
/// aren't scoped to a single task (e.g. a quest-level message).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub task_id: Option<Uuid>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// A handle to the process-wide event bus. Cheap to clone; every clone
/// shares the same underlying broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers it was
    /// delivered to; `0` just means nobody is currently listening, which is
    /// not an error -- the bus has no durability guarantee.
    pub fn publish(&self, event_type: impl Into<String>, task_id: Option<Uuid>, payload: Value) {
        let event = Event {
            event_type: event_type.into(),
            task_id,
            payload,
            emitted_at: Utc::now(),
        };
        // A send error only means there are currently no subscribers;
        // nothing to clean up, nothing to propagate.
        let _ = self.tx.send(event);
    }

    /// Subscribe to the bus. The returned receiver sees every event
    /// published after this call; use [`Subscription::recv`] with a
    /// type-prefix filter to narrow it down.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's view of the bus.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event, regardless of type. Returns `Err` if this
    /// subscription lagged and dropped events, or if the bus was dropped.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// Receive events, skipping any whose `event_type` doesn't start with
    /// `prefix`. Lag errors are swallowed (the subscriber just resumes from
    /// whatever is next available) since callers watching one prefix
    /// shouldn't be tripped up by unrelated event volume.
    pub async fn recv_matching(&mut self, prefix: &str) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.event_type.starts_with(prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        let task_id = Uuid::new_v4();
        bus.publish("task.completed", Some(task_id), serde_json::json!({"ok": true}));

        let event = sub.recv().await.expect("event should be delivered");
        assert_eq!(event.event_type, "task.completed");
        assert_eq!(event.task_id, Some(task_id));
    }

    #[tokio::test]
    async fn recv_matching_filters_by_prefix() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish("session.tool-call", None, serde_json::json!({}));
        bus.publish("task.completed", None, serde_json::json!({}));

        let event = sub.recv_matching("task.").await.expect("should find match");
        assert_eq!(event.event_type, "task.completed");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        bus.publish("task.created", None, serde_json::json!({}));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        bus.publish("quest.message", None, serde_json::json!({"text": "hi"}));

        assert_eq!(sub1.recv().await.unwrap().event_type, "quest.message");
        assert_eq!(sub2.recv().await.unwrap().event_type, "quest.message");
    }
}
