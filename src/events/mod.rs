//! Event Bus (SPEC_FULL.md §4.12).
//!
//! A per-session publisher/subscriber map. `publish` is non-blocking: slow
//! subscribers are dropped rather than allowed to back-pressure the
//! producer, matching the bounded-channel-plus-drop pattern the reference
//! runtime's WebSocket writer uses for server-to-client fan-out.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{SessionId, TaskId};

/// Bound on each subscriber's mailbox. A subscriber that cannot keep up is
/// considered disconnected and is dropped from the session's fan-out set.
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Init {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Thinking {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        stage: Option<String>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Status {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        stage: Option<String>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Progress {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        stage: Option<String>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Searching {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        stage: Option<String>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Sources {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Evaluating {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        stage: Option<String>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Result {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Error {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Cancelled {
        session_id: SessionId,
        task_uid: Option<TaskId>,
        content: serde_json::Value,
        ts: DateTime<Utc>,
    },
    Pong {
        session_id: SessionId,
        ts: DateTime<Utc>,
    },
}

impl ChatEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            ChatEvent::Init { session_id, .. }
            | ChatEvent::Thinking { session_id, .. }
            | ChatEvent::Status { session_id, .. }
            | ChatEvent::Progress { session_id, .. }
            | ChatEvent::Searching { session_id, .. }
            | ChatEvent::Sources { session_id, .. }
            | ChatEvent::Evaluating { session_id, .. }
            | ChatEvent::Result { session_id, .. }
            | ChatEvent::Error { session_id, .. }
            | ChatEvent::Cancelled { session_id, .. }
            | ChatEvent::Pong { session_id, .. } => *session_id,
        }
    }
}

pub type EventReceiver = mpsc::Receiver<ChatEvent>;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ChatEvent>,
}

/// Per-session fan-out. Holds a `DashMap<SessionId, Vec<Subscriber>>` rather
/// than one global mutex so publishes to different sessions never contend.
#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<SessionId, Vec<Subscriber>>,
    next_subscriber_id: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: SessionId) -> EventReceiver {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = self
            .next_subscriber_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.subscribers
            .entry(session_id)
            .or_default()
            .push(Subscriber { id, tx });
        rx
    }

    /// Idempotent: unsubscribing a handle that is already gone is a no-op.
    pub fn unsubscribe(&self, session_id: SessionId, rx: &EventReceiver) {
        if let Some(mut entry) = self.subscribers.get_mut(&session_id) {
            let _ = rx;
            entry.retain(|s| !s.tx.is_closed());
        }
    }

    /// Non-blocking publish: delivery order to each live subscriber equals
    /// publish order (Property 3). A subscriber whose mailbox is full is
    /// dropped rather than awaited on.
    pub fn publish(&self, session_id: SessionId, event: ChatEvent) {
        if let Some(mut entry) = self.subscribers.get_mut(&session_id) {
            entry.retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = sub.id, %session_id, "dropping slow WS subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.subscribers
            .get(&session_id)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(session_id: SessionId, n: u32) -> ChatEvent {
        ChatEvent::Progress {
            session_id,
            task_uid: None,
            stage: None,
            content: serde_json::json!({"n": n}),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivery_order_matches_publish_order() {
        let bus = EventBus::new();
        let session_id = SessionId::new();
        let mut rx = bus.subscribe(session_id);

        for n in 0..5 {
            bus.publish(session_id, evt(session_id, n));
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            if let Some(ChatEvent::Progress { content, .. }) = rx.recv().await {
                seen.push(content["n"].as_u64().unwrap());
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn publish_to_unknown_session_is_noop() {
        let bus = EventBus::new();
        bus.publish(SessionId::new(), evt(SessionId::new(), 0));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_every_event() {
        let bus = EventBus::new();
        let session_id = SessionId::new();
        let mut rx1 = bus.subscribe(session_id);
        let mut rx2 = bus.subscribe(session_id);
        bus.publish(session_id, evt(session_id, 42));

        assert!(matches!(rx1.recv().await, Some(ChatEvent::Progress { .. })));
        assert!(matches!(rx2.recv().await, Some(ChatEvent::Progress { .. })));
    }
}
