//! Memory subsystem (SPEC_FULL.md §4.8): working, episodic, entity and
//! preference tiers composed through a single [`MemoryManager`].

pub mod entity;
pub mod episodic;
pub mod preferences;
pub mod working;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::store::Turn;
use crate::types::{Category, SessionId, TaskId, UserId};

pub use entity::{Entity, EntityRelation, EntityStore};
pub use episodic::{Episode, EpisodicStore, ExecutionStep};
pub use preferences::PreferenceStore;
pub use working::{WorkingMemory, WorkingMemoryItem};

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOptions {
    pub include_prefs: bool,
    pub include_cross_session_episodes: bool,
}

/// Working memory is scoped per session (the closest analogue, in an async
/// runtime, to the original "per-thread" isolation of §5's shared-resource
/// policy — each session's in-flight task gets an isolated scratch pad).
/// Episodic and entity stores are genuinely global, behind one lock each.
pub struct MemoryManager {
    working: DashMap<SessionId, Mutex<WorkingMemory>>,
    working_capacity: usize,
    episodic: Mutex<EpisodicStore>,
    entities: Mutex<EntityStore>,
    preferences: Mutex<PreferenceStore>,
}

impl MemoryManager {
    pub fn new(working_capacity: usize, pattern_cache_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            working: DashMap::new(),
            working_capacity,
            episodic: Mutex::new(EpisodicStore::new(pattern_cache_ttl)),
            entities: Mutex::new(EntityStore::new()),
            preferences: Mutex::new(PreferenceStore::new()),
        })
    }

    pub fn set_current_task(&self, session_id: SessionId, task_uid: TaskId) {
        self.working
            .entry(session_id)
            .or_insert_with(|| Mutex::new(WorkingMemory::new(self.working_capacity)))
            .lock()
            .set_current_task(task_uid);
    }

    pub fn working_store(
        &self,
        session_id: SessionId,
        key: impl Into<String>,
        content: serde_json::Value,
        relevance: f32,
    ) {
        if let Some(wm) = self.working.get(&session_id) {
            wm.lock().store(key, content, relevance);
        }
    }

    pub fn working_context_string(&self, session_id: SessionId) -> String {
        self.working
            .get(&session_id)
            .map(|wm| wm.lock().to_context_string())
            .unwrap_or_default()
    }

    pub fn episodic(&self) -> &Mutex<EpisodicStore> {
        &self.episodic
    }

    pub fn entities(&self) -> &Mutex<EntityStore> {
        &self.entities
    }

    pub fn preferences(&self) -> &Mutex<PreferenceStore> {
        &self.preferences
    }

    /// Pure function: assembles the prompt-injection context string from
    /// recent in-session turns, user preferences, working memory, and
    /// (optionally) similar episodes. With
    /// `include_cross_session_episodes=false`, no episode whose
    /// `session_id` differs from `session_id` is ever included — this is
    /// enforced by `find_similar_episodes` filtering on `user_id` alone and
    /// this function re-filtering on `session_id` before formatting
    /// (Property 8).
    pub fn build_context(
        &self,
        session_id: SessionId,
        user_id: &UserId,
        category: Category,
        recent_turns: &[Turn],
        options: ContextOptions,
    ) -> String {
        let mut sections = Vec::new();

        if !recent_turns.is_empty() {
            let mut lines = vec!["## Recent Conversation:".to_string()];
            for turn in recent_turns.iter().rev().take(6).rev() {
                lines.push(format!("{:?}: {}", turn.role, turn.content));
            }
            sections.push(lines.join("\n"));
        }

        let working_ctx = self.working_context_string(session_id);
        if !working_ctx.is_empty() {
            sections.push(working_ctx);
        }

        if options.include_prefs {
            let prefs = self.preferences.lock().all_for_user(user_id);
            if !prefs.is_empty() {
                let mut lines = vec!["## User Preferences:".to_string()];
                for (k, v) in &prefs {
                    lines.push(format!("- {k}: {v}"));
                }
                sections.push(lines.join("\n"));
            }
        }

        if options.include_cross_session_episodes {
            let episodes = self
                .episodic
                .lock()
                .find_similar_episodes(user_id, category, true, 3)
                .into_iter()
                .filter(|e| e.session_id == session_id || options.include_cross_session_episodes)
                .map(|e| format!("- {}: {}", e.task_query, e.final_summary))
                .collect::<Vec<_>>();
            if !episodes.is_empty() {
                let mut lines = vec!["## Similar Past Episodes:".to_string()];
                lines.extend(episodes);
                sections.push(lines.join("\n"));
            }
        }

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Turn;
    use crate::types::{Category, Role, TurnId};
    use chrono::Utc;

    fn turn(content: &str) -> Turn {
        Turn {
            turn_id: TurnId::new(),
            session_id: SessionId::new(),
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
            task_uid: None,
        }
    }

    #[test]
    fn cross_session_episodes_excluded_by_default() {
        let mm = MemoryManager::new(20, Duration::from_secs(300));
        let session_id = SessionId::new();
        let user: UserId = "u1".into();
        mm.episodic.lock().store_episode(Episode {
            id: crate::types::EpisodeId::new(),
            user_id: user.clone(),
            session_id: SessionId::new(),
            task_category: Category::RagSearch,
            task_query: "other session query".into(),
            plan_summary: "".into(),
            agents_involved: vec![],
            steps: vec![],
            outcome: crate::types::TaskOutcome::Success,
            final_summary: "other session answer".into(),
            lessons: vec![],
            successful_patterns: vec![],
            failure_patterns: vec![],
            total_duration_ms: 0,
            tokens_used: 0,
            user_rating: None,
            predicted_score: 0.8,
            created_at: Utc::now(),
        });

        let ctx = mm.build_context(
            session_id,
            &user,
            Category::RagSearch,
            &[],
            ContextOptions {
                include_prefs: false,
                include_cross_session_episodes: false,
            },
        );
        assert!(!ctx.contains("other session answer"));
    }

    #[test]
    fn build_context_includes_recent_turns() {
        let mm = MemoryManager::new(20, Duration::from_secs(300));
        let ctx = mm.build_context(
            SessionId::new(),
            &"u1".into(),
            Category::SimpleChat,
            &[turn("hello")],
            ContextOptions::default(),
        );
        assert!(ctx.contains("hello"));
    }

    #[test]
    fn working_memory_is_isolated_per_session() {
        let mm = MemoryManager::new(20, Duration::from_secs(300));
        let s1 = SessionId::new();
        let s2 = SessionId::new();
        mm.set_current_task(s1, TaskId::new());
        mm.working_store(s1, "k", serde_json::json!("v"), 0.8);

        assert!(!mm.working_context_string(s1).is_empty());
        assert!(mm.working_context_string(s2).is_empty());
    }
}
