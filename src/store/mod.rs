//! Session/Task Store (SPEC_FULL.md §4.5).
//!
//! Durable append-only storage for `Session`, `Turn`, `Task` and
//! `ThinkingStep`. Writes are serialized per `session_id` via a per-session
//! `tokio::sync::Mutex`, matching the "row-level or queue-level" policy of
//! §5 without taking one global lock for unrelated sessions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::types::{
    Category, Role, SessionId, StepType, TaskId, TaskOutcome, TaskStatus, TurnId, UserId,
};
use crate::types::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: TurnId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub task_uid: Option<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_uid: TaskId,
    pub session_id: SessionId,
    pub query: String,
    pub category: Option<Category>,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub primary_agent: Option<String>,
    pub supporting_agents: Vec<String>,
    pub quality_score: Option<f32>,
    pub outcome: Option<TaskOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub seq: u64,
    pub task_uid: TaskId,
    pub step_type: StepType,
    pub agent_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionRecord {
    session: Option<Session>,
    turns: Vec<Turn>,
    tasks: Vec<Task>,
    steps_by_task: std::collections::HashMap<TaskId, Vec<ThinkingStep>>,
    seq_by_task: std::collections::HashMap<TaskId, u64>,
}

/// The store's in-process durable structure. Real deployments would back
/// this with the relational engine described in SPEC_FULL.md §6; the engine
/// choice is external, so this holds the same invariants behind the same
/// shape a SQL-backed implementation would expose.
pub struct SessionStore {
    records: DashMap<SessionId, Arc<Mutex<SessionRecord>>>,
    task_index: DashMap<TaskId, SessionId>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            task_index: DashMap::new(),
        }
    }

    fn record_for(&self, session_id: SessionId) -> Arc<Mutex<SessionRecord>> {
        self.records
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(SessionRecord::default())))
            .clone()
    }

    pub async fn create_session(&self, user_id: UserId, title: Option<String>) -> Session {
        let session = Session {
            session_id: SessionId::new(),
            user_id,
            created_at: Utc::now(),
            title,
        };
        let record = self.record_for(session.session_id);
        record.lock().await.session = Some(session.clone());
        session
    }

    pub async fn get_session(&self, session_id: SessionId) -> Option<Session> {
        let record = self.records.get(&session_id)?.clone();
        let session = record.lock().await.session.clone();
        session
    }

    pub async fn append_turn(
        &self,
        session_id: SessionId,
        role: Role,
        content: impl Into<String>,
        task_uid: Option<TaskId>,
    ) -> Result<Turn, StoreError> {
        let record = self
            .records
            .get(&session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let mut guard = record.lock().await;
        let turn = Turn {
            turn_id: TurnId::new(),
            session_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            task_uid,
        };
        guard.turns.push(turn.clone());
        Ok(turn)
    }

    pub async fn open_task(&self, session_id: SessionId, query: impl Into<String>) -> Result<Task, StoreError> {
        let record = self
            .records
            .get(&session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let mut guard = record.lock().await;
        let task = Task {
            task_uid: TaskId::new(),
            session_id,
            query: query.into(),
            category: None,
            status: TaskStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            primary_agent: None,
            supporting_agents: Vec::new(),
            quality_score: None,
            outcome: None,
        };
        guard.tasks.push(task.clone());
        self.task_index.insert(task.task_uid, session_id);
        Ok(task)
    }

    pub async fn update_task<F>(&self, task_uid: TaskId, f: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task),
    {
        let session_id = *self
            .task_index
            .get(&task_uid)
            .ok_or_else(|| StoreError::TaskNotFound(task_uid.to_string()))?;
        let record = self.record_for(session_id);
        let mut guard = record.lock().await;
        let task = guard
            .tasks
            .iter_mut()
            .find(|t| t.task_uid == task_uid)
            .ok_or_else(|| StoreError::TaskNotFound(task_uid.to_string()))?;
        f(task);
        Ok(task.clone())
    }

    pub async fn get_task(&self, task_uid: TaskId) -> Option<Task> {
        let session_id = *self.task_index.get(&task_uid)?;
        let record = self.records.get(&session_id)?.clone();
        let guard = record.lock().await;
        guard.tasks.iter().find(|t| t.task_uid == task_uid).cloned()
    }

    /// Appends the next gap-free sequence number for this task (Invariant i).
    pub async fn append_step(
        &self,
        task_uid: TaskId,
        step_type: StepType,
        agent_name: Option<String>,
        content: impl Into<String>,
    ) -> Result<ThinkingStep, StoreError> {
        let session_id = *self
            .task_index
            .get(&task_uid)
            .ok_or_else(|| StoreError::TaskNotFound(task_uid.to_string()))?;
        let record = self.record_for(session_id);
        let mut guard = record.lock().await;
        let seq = guard.seq_by_task.entry(task_uid).or_insert(0);
        *seq += 1;
        let step = ThinkingStep {
            seq: *seq,
            task_uid,
            step_type,
            agent_name,
            content: content.into(),
            created_at: Utc::now(),
        };
        guard
            .steps_by_task
            .entry(task_uid)
            .or_default()
            .push(step.clone());
        Ok(step)
    }

    pub async fn get_steps(&self, task_uid: TaskId) -> Vec<ThinkingStep> {
        let Some(session_id) = self.task_index.get(&task_uid).map(|e| *e) else {
            return Vec::new();
        };
        let Some(record) = self.records.get(&session_id) else {
            return Vec::new();
        };
        let guard = record.lock().await;
        guard
            .steps_by_task
            .get(&task_uid)
            .cloned()
            .unwrap_or_default()
    }

    /// Ordered turns with embedded steps per task, for `GET /chat/session/{id}`.
    pub async fn session_history(&self, session_id: SessionId) -> Result<Vec<Turn>, StoreError> {
        let record = self
            .records
            .get(&session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let guard = record.lock().await;
        Ok(guard.turns.clone())
    }

    pub async fn clear_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        let record = self
            .records
            .get(&session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let mut guard = record.lock().await;
        for task in &guard.tasks {
            self.task_index.remove(&task.task_uid);
        }
        guard.turns.clear();
        guard.tasks.clear();
        guard.steps_by_task.clear();
        guard.seq_by_task.clear();
        Ok(())
    }
}

/// A process-wide monotonic counter used where callers need an ordering hint
/// independent of wall-clock resolution (e.g. tie-breaking in query results).
pub static GLOBAL_WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn next_write_ordinal() -> u64 {
    GLOBAL_WRITE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn thinking_step_sequence_is_gap_free() {
        let store = SessionStore::new();
        let session = store.create_session("u1".into(), None).await;
        let task = store.open_task(session.session_id, "hi").await.unwrap();

        for _ in 0..5 {
            store
                .append_step(task.task_uid, StepType::Progress, None, "x")
                .await
                .unwrap();
        }

        let steps = store.get_steps(task.task_uid).await;
        let seqs: Vec<u64> = steps.iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn task_not_found_returns_store_error() {
        let store = SessionStore::new();
        let result = store
            .append_step(TaskId::new(), StepType::Progress, None, "x")
            .await;
        assert!(matches!(result, Err(StoreError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn session_history_returns_turns_in_append_order() {
        let store = SessionStore::new();
        let session = store.create_session("u1".into(), None).await;
        store
            .append_turn(session.session_id, Role::User, "hello", None)
            .await
            .unwrap();
        store
            .append_turn(session.session_id, Role::Assistant, "hi there", None)
            .await
            .unwrap();

        let history = store.session_history(session.session_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "hi there");
    }

    #[tokio::test]
    async fn clear_session_removes_tasks_and_steps() {
        let store = SessionStore::new();
        let session = store.create_session("u1".into(), None).await;
        let task = store.open_task(session.session_id, "hi").await.unwrap();
        store
            .append_step(task.task_uid, StepType::Thinking, None, "x")
            .await
            .unwrap();

        store.clear_session(session.session_id).await.unwrap();
        assert!(store.get_task(task.task_uid).await.is_none());
    }
}
