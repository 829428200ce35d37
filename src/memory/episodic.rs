//! Episodic memory (SPEC_FULL.md §4.8, §4.11).
//!
//! Records the full execution of a task so future tasks in the same
//! category can be informed by what worked and what didn't. Grounded on the
//! original implementation's `EpisodicMemoryStore`: indexed by
//! `(user_id, category, outcome)`, most-recent-first retrieval, deduplicated
//! pattern extraction, with a short-TTL cache in front of the aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::types::{Category, EpisodeId, SessionId, TaskOutcome, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: u32,
    pub agent_name: String,
    pub action: String,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub task_category: Category,
    pub task_query: String,
    pub plan_summary: String,
    pub agents_involved: Vec<String>,
    pub steps: Vec<ExecutionStep>,
    pub outcome: TaskOutcome,
    pub final_summary: String,
    pub lessons: Vec<String>,
    pub successful_patterns: Vec<String>,
    pub failure_patterns: Vec<String>,
    pub total_duration_ms: u64,
    pub tokens_used: u64,
    pub user_rating: Option<u8>,
    /// The quality score this episode's run was recorded with, fed to
    /// [`crate::reasoning::AdaptiveEvaluator::record_user_rating`] as the
    /// prediction a later user rating either confirms or corrects.
    pub predicted_score: f32,
    pub created_at: DateTime<Utc>,
}

struct PatternCache {
    computed_at: Instant,
    patterns: Vec<String>,
}

/// In-process episodic store. Real deployments would back this with the
/// relational engine described in SPEC_FULL.md §6; this crate's default is
/// an in-memory structure behind the same query shape.
pub struct EpisodicStore {
    episodes: Vec<Episode>,
    success_cache: HashMap<Category, PatternCache>,
    failure_cache: HashMap<Category, PatternCache>,
    cache_ttl: Duration,
}

impl EpisodicStore {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            episodes: Vec::new(),
            success_cache: HashMap::new(),
            failure_cache: HashMap::new(),
            cache_ttl,
        }
    }

    /// Episodes are immutable once stored; only `user_rating` may be
    /// mutated afterward via [`Self::record_user_rating`].
    pub fn store_episode(&mut self, episode: Episode) -> EpisodeId {
        let id = episode.id;
        self.success_cache.remove(&episode.task_category);
        self.failure_cache.remove(&episode.task_category);
        self.episodes.push(episode);
        id
    }

    pub fn record_user_rating(&mut self, id: EpisodeId, rating: u8) -> bool {
        if let Some(ep) = self.episodes.iter_mut().find(|e| e.id == id) {
            ep.user_rating = Some(rating);
            true
        } else {
            false
        }
    }

    pub fn get_episode(&self, id: EpisodeId) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.id == id)
    }

    /// Most-recent-first, optionally restricted to the same user. Does not
    /// cross session boundaries on its own — callers decide whether to
    /// include cross-session episodes per §4.8 (default: same user/category
    /// only, regardless of session).
    pub fn find_similar_episodes(
        &self,
        user_id: &UserId,
        category: Category,
        only_successful: bool,
        limit: usize,
    ) -> Vec<&Episode> {
        let mut matches: Vec<&Episode> = self
            .episodes
            .iter()
            .filter(|e| &e.user_id == user_id && e.task_category == category)
            .filter(|e| !only_successful || e.outcome == TaskOutcome::Success)
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit);
        matches
    }

    pub fn get_success_patterns(&mut self, category: Category, limit: usize) -> Vec<String> {
        if let Some(cached) = self.success_cache.get(&category) {
            if cached.computed_at.elapsed() < self.cache_ttl {
                return cached.patterns.clone();
            }
        }
        let mut set = HashSet::new();
        let mut eps: Vec<&Episode> = self
            .episodes
            .iter()
            .filter(|e| e.task_category == category && e.outcome == TaskOutcome::Success)
            .collect();
        eps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for ep in eps.into_iter().take(limit) {
            set.extend(ep.successful_patterns.iter().cloned());
        }
        let patterns: Vec<String> = set.into_iter().collect();
        self.success_cache.insert(
            category,
            PatternCache {
                computed_at: Instant::now(),
                patterns: patterns.clone(),
            },
        );
        patterns
    }

    pub fn get_failure_patterns(&mut self, category: Category, limit: usize) -> Vec<String> {
        if let Some(cached) = self.failure_cache.get(&category) {
            if cached.computed_at.elapsed() < self.cache_ttl {
                return cached.patterns.clone();
            }
        }
        let mut set = HashSet::new();
        let mut eps: Vec<&Episode> = self
            .episodes
            .iter()
            .filter(|e| {
                e.task_category == category
                    && matches!(e.outcome, TaskOutcome::Failure | TaskOutcome::Partial)
            })
            .collect();
        eps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for ep in eps.into_iter().take(limit) {
            set.extend(ep.failure_patterns.iter().cloned());
        }
        let patterns: Vec<String> = set.into_iter().collect();
        self.failure_cache.insert(
            category,
            PatternCache {
                computed_at: Instant::now(),
                patterns: patterns.clone(),
            },
        );
        patterns
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_episode(user: &str, session: SessionId, category: Category, outcome: TaskOutcome) -> Episode {
        Episode {
            id: EpisodeId::new(),
            user_id: user.into(),
            session_id: session,
            task_category: category,
            task_query: "q".into(),
            plan_summary: "plan".into(),
            agents_involved: vec!["rag".into()],
            steps: vec![],
            outcome,
            final_summary: "done".into(),
            lessons: vec![],
            successful_patterns: vec!["cited sources".into()],
            failure_patterns: vec!["ignored sources".into()],
            total_duration_ms: 100,
            tokens_used: 50,
            user_rating: None,
            predicted_score: 0.8,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn find_similar_episodes_filters_by_user_and_category() {
        let mut store = EpisodicStore::new(Duration::from_secs(300));
        let session = SessionId::new();
        store.store_episode(sample_episode("alice", session, Category::RagSearch, TaskOutcome::Success));
        store.store_episode(sample_episode("bob", session, Category::RagSearch, TaskOutcome::Success));

        let found = store.find_similar_episodes(&"alice".into(), Category::RagSearch, false, 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id.0, "alice");
    }

    #[test]
    fn success_patterns_are_deduplicated() {
        let mut store = EpisodicStore::new(Duration::from_secs(300));
        let session = SessionId::new();
        store.store_episode(sample_episode("alice", session, Category::RagSearch, TaskOutcome::Success));
        store.store_episode(sample_episode("alice", session, Category::RagSearch, TaskOutcome::Success));

        let patterns = store.get_success_patterns(Category::RagSearch, 10);
        assert_eq!(patterns, vec!["cited sources".to_string()]);
    }

    #[test]
    fn user_rating_is_the_only_mutable_field() {
        let mut store = EpisodicStore::new(Duration::from_secs(300));
        let ep = sample_episode("alice", SessionId::new(), Category::RagSearch, TaskOutcome::Success);
        let id = store.store_episode(ep);
        assert!(store.record_user_rating(id, 5));
        assert_eq!(store.episodes[0].user_rating, Some(5));
    }

    #[test]
    fn only_successful_excludes_failures() {
        let mut store = EpisodicStore::new(Duration::from_secs(300));
        let session = SessionId::new();
        store.store_episode(sample_episode("alice", session, Category::Analysis, TaskOutcome::Failure));
        let found = store.find_similar_episodes(&"alice".into(), Category::Analysis, true, 5);
        assert!(found.is_empty());
    }
}
