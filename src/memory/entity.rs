//! Entity memory (SPEC_FULL.md §4.8, Property 5).
//!
//! Entities get a deterministic id (`hash(type:lower(name):user_id)`), so
//! re-inserting the same referent is idempotent: it bumps `mention_count`
//! and `last_mentioned` rather than creating a duplicate row. Relations are
//! an edge table keyed by `(src, dst, type)`, traversed iteratively with a
//! visited set so cycles in the entity graph can never overflow the stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{EntityId, EntityType, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    pub attributes: serde_json::Value,
    pub user_id: UserId,
    pub first_mentioned: DateTime<Utc>,
    pub last_mentioned: DateTime<Utc>,
    pub mention_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub src: EntityId,
    pub dst: EntityId,
    pub relation_type: String,
    pub confidence: f32,
    pub context: String,
    pub created_at: DateTime<Utc>,
}

pub fn deterministic_entity_id(entity_type: EntityType, name: &str, user_id: &UserId) -> EntityId {
    let key = format!("{}:{}:{}", entity_type, name.to_lowercase(), user_id);
    let digest = Sha256::digest(key.as_bytes());
    EntityId(hex::encode(&digest[..8]))
}

/// `(src, dst, type)` is the dedup key for edges, matching SPEC_FULL.md §9's
/// "store relations as an edge table" design note.
#[derive(Hash, PartialEq, Eq, Clone)]
struct RelationKey {
    src: EntityId,
    dst: EntityId,
    relation_type: String,
}

#[derive(Default)]
pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
    relations: HashMap<RelationKey, EntityRelation>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on `(type, lower(name), user_id)`: a second insert bumps
    /// `mention_count` by exactly 1 and advances `last_mentioned`.
    pub fn store_entity(
        &mut self,
        name: impl Into<String>,
        entity_type: EntityType,
        user_id: UserId,
        aliases: Vec<String>,
        attributes: serde_json::Value,
    ) -> EntityId {
        let name = name.into();
        let id = deterministic_entity_id(entity_type, &name, &user_id);
        let now = Utc::now();
        match self.entities.get_mut(&id) {
            Some(existing) => {
                existing.mention_count += 1;
                existing.last_mentioned = now;
                for alias in aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
            }
            None => {
                self.entities.insert(
                    id.clone(),
                    Entity {
                        id: id.clone(),
                        name,
                        entity_type,
                        aliases,
                        attributes,
                        user_id,
                        first_mentioned: now,
                        last_mentioned: now,
                        mention_count: 1,
                    },
                );
            }
        }
        id
    }

    pub fn get_entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Checks `name` and every alias, case-insensitively.
    pub fn find_entity(&self, name: &str, entity_type: Option<EntityType>) -> Option<&Entity> {
        let needle = name.to_lowercase();
        self.entities.values().find(|e| {
            entity_type.map_or(true, |t| t == e.entity_type)
                && (e.name.to_lowercase() == needle
                    || e.aliases.iter().any(|a| a.to_lowercase() == needle))
        })
    }

    pub fn store_relation(
        &mut self,
        src: EntityId,
        dst: EntityId,
        relation_type: impl Into<String>,
        confidence: f32,
        context: impl Into<String>,
    ) {
        let relation_type = relation_type.into();
        let key = RelationKey {
            src: src.clone(),
            dst: dst.clone(),
            relation_type: relation_type.clone(),
        };
        self.relations.entry(key).or_insert(EntityRelation {
            src,
            dst,
            relation_type,
            confidence,
            context: context.into(),
            created_at: Utc::now(),
        });
    }

    /// One hop of outgoing relations from `id`, optionally filtered by type.
    pub fn get_related_entities(
        &self,
        id: &EntityId,
        relation_type: Option<&str>,
    ) -> Vec<&Entity> {
        self.relations
            .values()
            .filter(|r| &r.src == id)
            .filter(|r| relation_type.map_or(true, |t| r.relation_type == t))
            .filter_map(|r| self.entities.get(&r.dst))
            .collect()
    }

    /// Full reachability from `id` via outgoing relations. Iterative with a
    /// visited set — safe against cycles in the entity graph (§9).
    pub fn traverse_reachable(&self, id: &EntityId) -> Vec<&Entity> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut out = Vec::new();
        queue.push_back(id.clone());
        visited.insert(id.clone());

        while let Some(current) = queue.pop_front() {
            for rel in self.relations.values().filter(|r| r.src == current) {
                if visited.insert(rel.dst.clone()) {
                    if let Some(entity) = self.entities.get(&rel.dst) {
                        out.push(entity);
                    }
                    queue.push_back(rel.dst.clone());
                }
            }
        }
        out
    }

    pub fn user_entities(&self, user_id: &UserId) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| &e.user_id == user_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_bumps_mention_count_not_row_count() {
        let mut store = EntityStore::new();
        store.store_entity("Alice", EntityType::Person, "u1".into(), vec![], serde_json::json!({}));
        store.store_entity("Alice", EntityType::Person, "u1".into(), vec![], serde_json::json!({}));

        assert_eq!(store.len(), 1);
        let id = deterministic_entity_id(EntityType::Person, "Alice", &"u1".into());
        let entity = store.get_entity(&id).unwrap();
        assert_eq!(entity.mention_count, 2);
    }

    #[test]
    fn deterministic_id_is_case_insensitive_on_name() {
        let a = deterministic_entity_id(EntityType::Person, "Alice", &"u1".into());
        let b = deterministic_entity_id(EntityType::Person, "alice", &"u1".into());
        assert_eq!(a, b);
    }

    #[test]
    fn find_entity_matches_aliases() {
        let mut store = EntityStore::new();
        store.store_entity(
            "Alice",
            EntityType::Person,
            "u1".into(),
            vec!["Ally".into()],
            serde_json::json!({}),
        );
        let found = store.find_entity("ally", None);
        assert!(found.is_some());
        assert_eq!(found.unwrap().name, "Alice");
    }

    #[test]
    fn relation_dedup_on_src_dst_type() {
        let mut store = EntityStore::new();
        let a = store.store_entity("Alice", EntityType::Person, "u1".into(), vec![], serde_json::json!({}));
        let b = store.store_entity("Acme", EntityType::Org, "u1".into(), vec![], serde_json::json!({}));
        store.store_relation(a.clone(), b.clone(), "works_at", 0.9, "ctx");
        store.store_relation(a.clone(), b.clone(), "works_at", 0.5, "ctx2");
        assert_eq!(store.relations.len(), 1);
    }

    #[test]
    fn traversal_handles_cycles_without_overflow() {
        let mut store = EntityStore::new();
        let a = store.store_entity("A", EntityType::Concept, "u1".into(), vec![], serde_json::json!({}));
        let b = store.store_entity("B", EntityType::Concept, "u1".into(), vec![], serde_json::json!({}));
        store.store_relation(a.clone(), b.clone(), "relates_to", 1.0, "");
        store.store_relation(b.clone(), a.clone(), "relates_to", 1.0, "");

        let reachable = store.traverse_reachable(&a);
        assert_eq!(reachable.len(), 1);
        assert_eq!(reachable[0].name, "B");
    }
}
