//! Debug Trace Ring Buffer (SPEC_FULL.md §4.13).
//!
//! A thread-safe bounded FIFO of [`DebugTrace`] records. Oldest traces are
//! evicted once the ring is full; traces are never reordered. Mirrors the
//! eviction discipline of the reference runtime's `BufferedJournal`, but
//! keyed for query-by-session/task/agent/type rather than sequence replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{SessionId, TaskId, TraceType};

/// Payloads are truncated to this many bytes before storage.
const MAX_PAYLOAD_BYTES: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugTrace {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub session_id: SessionId,
    pub task_uid: Option<TaskId>,
    pub trace_type: TraceType,
    pub agent_name: Option<String>,
    pub source: String,
    pub target: String,
    pub content: String,
    pub duration_ms: Option<u64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Default, Clone)]
pub struct TraceQuery {
    pub session_id: Option<SessionId>,
    pub task_uid: Option<TaskId>,
    pub agent_name: Option<String>,
    pub trace_type: Option<TraceType>,
    pub limit: Option<usize>,
}

fn truncate(content: &str) -> String {
    if content.len() <= MAX_PAYLOAD_BYTES {
        content.to_string()
    } else {
        let mut end = MAX_PAYLOAD_BYTES;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…[truncated]", &content[..end])
    }
}

/// Bounded deque of trace records behind a single lock, matching the
/// "one lock around append and counter increment" resource policy of §5.
pub struct DebugRing {
    capacity: usize,
    next_id: AtomicU64,
    buffer: parking_lot::Mutex<VecDeque<DebugTrace>>,
}

#[allow(clippy::too_many_arguments)]
pub struct RecordTrace {
    pub session_id: SessionId,
    pub task_uid: Option<TaskId>,
    pub trace_type: TraceType,
    pub agent_name: Option<String>,
    pub source: String,
    pub target: String,
    pub content: String,
    pub duration_ms: Option<u64>,
    pub metadata: serde_json::Value,
}

impl DebugRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            buffer: parking_lot::Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn record(&self, trace: RecordTrace) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = DebugTrace {
            id,
            ts: Utc::now(),
            session_id: trace.session_id,
            task_uid: trace.task_uid,
            trace_type: trace.trace_type,
            agent_name: trace.agent_name,
            source: trace.source,
            target: trace.target,
            content: truncate(&trace.content),
            duration_ms: trace.duration_ms,
            metadata: trace.metadata,
        };

        let mut buf = self.buffer.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
        id
    }

    pub fn query(&self, q: &TraceQuery) -> Vec<DebugTrace> {
        let buf = self.buffer.lock();
        let mut out: Vec<DebugTrace> = buf
            .iter()
            .filter(|t| q.session_id.map_or(true, |s| t.session_id == s))
            .filter(|t| q.task_uid.map_or(true, |tu| t.task_uid == Some(tu)))
            .filter(|t| {
                q.agent_name
                    .as_ref()
                    .map_or(true, |name| t.agent_name.as_deref() == Some(name.as_str()))
            })
            .filter(|t| q.trace_type.map_or(true, |tt| t.trace_type == tt))
            .cloned()
            .collect();
        if let Some(limit) = q.limit {
            if out.len() > limit {
                out = out.split_off(out.len() - limit);
            }
        }
        out
    }

    pub fn get_task_flow(&self, task_uid: TaskId) -> Vec<DebugTrace> {
        self.query(&TraceQuery {
            task_uid: Some(task_uid),
            ..Default::default()
        })
    }

    pub fn get_session_flow(&self, session_id: SessionId) -> Vec<DebugTrace> {
        self.query(&TraceQuery {
            session_id: Some(session_id),
            ..Default::default()
        })
    }

    pub fn recent(&self, limit: usize) -> Vec<DebugTrace> {
        self.query(&TraceQuery {
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(session_id: SessionId) -> RecordTrace {
        RecordTrace {
            session_id,
            task_uid: None,
            trace_type: TraceType::Routing,
            agent_name: None,
            source: "test".into(),
            target: "test".into(),
            content: "hello".into(),
            duration_ms: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn eviction_retains_exactly_the_last_c_in_publish_order() {
        let ring = DebugRing::new(3);
        let session_id = SessionId::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(ring.record(trace(session_id)));
        }
        let retained: Vec<u64> = ring.recent(100).into_iter().map(|t| t.id).collect();
        assert_eq!(retained, &ids[2..]);
    }

    #[test]
    fn query_filters_by_session() {
        let ring = DebugRing::new(10);
        let a = SessionId::new();
        let b = SessionId::new();
        ring.record(trace(a));
        ring.record(trace(b));
        let results = ring.query(&TraceQuery {
            session_id: Some(a),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, a);
    }

    #[test]
    fn large_payload_is_truncated() {
        let ring = DebugRing::new(10);
        let mut t = trace(SessionId::new());
        t.content = "x".repeat(5000);
        ring.record(t);
        let got = ring.recent(1);
        assert!(got[0].content.len() < 5000);
    }

    #[test]
    fn clear_empties_the_ring() {
        let ring = DebugRing::new(10);
        ring.record(trace(SessionId::new()));
        assert!(!ring.is_empty());
        ring.clear();
        assert!(ring.is_empty());
    }
}
