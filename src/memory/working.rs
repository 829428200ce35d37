//! Working memory (SPEC_FULL.md §4.8).
//!
//! Grounded on the original implementation's `WorkingMemory`: an
//! `OrderedDict`-style LRU keyed store scored by
//! `0.7·relevance + 0.3·recency`, cleared on task boundary.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::TaskId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryItem {
    pub key: String,
    pub content: serde_json::Value,
    pub relevance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
}

impl WorkingMemoryItem {
    fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

pub struct WorkingMemory {
    capacity: usize,
    items: IndexMap<String, WorkingMemoryItem>,
    current_task_id: Option<TaskId>,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: IndexMap::new(),
            current_task_id: None,
        }
    }

    /// Clears all items whenever the task id changes (Property 6: memory
    /// isolation — no item tagged to T1 survives once T2 becomes current).
    pub fn set_current_task(&mut self, task_uid: TaskId) {
        if self.current_task_id != Some(task_uid) {
            self.clear();
            self.current_task_id = Some(task_uid);
        }
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.current_task_id
    }

    pub fn store(&mut self, key: impl Into<String>, content: serde_json::Value, relevance: f32) {
        let key = key.into();
        if self.items.len() >= self.capacity && !self.items.contains_key(&key) {
            self.evict_least_relevant();
        }
        let relevance = relevance.clamp(0.0, 1.0);
        let now = Utc::now();
        self.items.insert(
            key.clone(),
            WorkingMemoryItem {
                key,
                content,
                relevance,
                created_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        let item = self.items.get_mut(key)?;
        item.touch();
        Some(item.content.clone())
    }

    pub fn get_top_relevant(&self, n: usize) -> Vec<WorkingMemoryItem> {
        let mut items: Vec<WorkingMemoryItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap());
        items.truncate(n);
        items
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.items.shift_remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.current_task_id = None;
    }

    fn recency_factor(item: &WorkingMemoryItem) -> f32 {
        let age_seconds = (Utc::now() - item.last_accessed).num_milliseconds() as f32 / 1000.0;
        1.0 / (1.0 + (age_seconds / 60.0).max(0.0))
    }

    fn evict_least_relevant(&mut self) {
        let victim = self
            .items
            .iter()
            .map(|(k, v)| {
                let score = v.relevance * 0.7 + Self::recency_factor(v) * 0.3;
                (k.clone(), score)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(k, _)| k);
        if let Some(key) = victim {
            self.items.shift_remove(&key);
        }
    }

    pub fn to_context_string(&self) -> String {
        if self.items.is_empty() {
            return String::new();
        }
        let mut lines = vec!["## Working Memory Context:".to_string()];
        for item in self.get_top_relevant(10) {
            let mut content = item.content.to_string();
            if content.len() > 200 {
                content.truncate(200);
                content.push_str("...");
            }
            lines.push(format!("- {}: {}", item.key, content));
        }
        lines.join("\n")
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_current_task_clears_prior_items() {
        let mut wm = WorkingMemory::new(20);
        let t1 = TaskId::new();
        let t2 = TaskId::new();
        wm.set_current_task(t1);
        wm.store("k", serde_json::json!("v"), 0.5);
        assert_eq!(wm.len(), 1);

        wm.set_current_task(t2);
        assert_eq!(wm.len(), 0);
        assert_eq!(wm.current_task_id(), Some(t2));
    }

    #[test]
    fn eviction_respects_capacity() {
        let mut wm = WorkingMemory::new(2);
        wm.store("a", serde_json::json!(1), 0.1);
        wm.store("b", serde_json::json!(2), 0.9);
        wm.store("c", serde_json::json!(3), 0.9);
        assert_eq!(wm.len(), 2);
        assert!(wm.get("a").is_none());
    }

    #[test]
    fn top_relevant_is_sorted_descending() {
        let mut wm = WorkingMemory::new(10);
        wm.store("low", serde_json::json!(1), 0.1);
        wm.store("high", serde_json::json!(2), 0.9);
        let top = wm.get_top_relevant(2);
        assert_eq!(top[0].key, "high");
        assert_eq!(top[1].key, "low");
    }

    #[test]
    fn context_string_is_empty_when_no_items() {
        let wm = WorkingMemory::new(5);
        assert_eq!(wm.to_context_string(), "");
    }
}
