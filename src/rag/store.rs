//! Vector Store Facade implementation.
//!
//! The `VectorStore` trait is the facade boundary: the concrete embedding
//! model and index engine are a configuration point (SPEC_FULL.md §9), so
//! callers depend only on this trait. `InMemoryVectorStore` is the in-process
//! default — an exact, order-stable cosine-similarity scan, suitable for a
//! single-node deployment and deterministic given identical embeddings and
//! index state.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::error::RagError;
use crate::types::DocumentId;

use super::types::{Document, DocumentChunk, KbCollection, QueryMatch, Skills};

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_collections(&self) -> Vec<KbCollection>;
    async fn create_collection(
        &self,
        name: &str,
        description: &str,
        category: &str,
        skills: Skills,
    ) -> Result<(), RagError>;
    async fn delete_collection(&self, name: &str) -> Result<(), RagError>;
    async fn insert(
        &self,
        collection: &str,
        content: String,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<DocumentId, RagError>;
    async fn delete(&self, collection: &str, id: DocumentId) -> Result<(), RagError>;
    async fn query(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, RagError>;
    /// Picks the collection whose skills keywords/topics best overlap
    /// `content`, by simple case-insensitive token match. This is a coarse
    /// pre-filter independent of the LLM-driven Classifier, which the
    /// Manager layers on top for the final routing decision.
    async fn smart_suggest(&self, content: &str) -> Result<Option<String>, RagError>;
    async fn smart_insert(
        &self,
        content: String,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
        auto_create: bool,
    ) -> Result<(String, DocumentId), RagError>;
}

struct Collection {
    meta: KbCollection,
    documents: HashMap<DocumentId, Document>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn list_collections(&self) -> Vec<KbCollection> {
        self.collections
            .read()
            .values()
            .map(|c| KbCollection {
                doc_count: c.documents.len(),
                ..c.meta.clone()
            })
            .collect()
    }

    async fn create_collection(
        &self,
        name: &str,
        description: &str,
        category: &str,
        skills: Skills,
    ) -> Result<(), RagError> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(RagError::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                meta: KbCollection {
                    name: name.to_string(),
                    description: description.to_string(),
                    category: category.to_string(),
                    doc_count: 0,
                    skills,
                },
                documents: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), RagError> {
        self.collections
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RagError::CollectionNotFound(name.to_string()))
    }

    async fn insert(
        &self,
        collection: &str,
        content: String,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<DocumentId, RagError> {
        let mut collections = self.collections.write();
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        let id = DocumentId::new();
        let doc = Document {
            id,
            collection: collection.to_string(),
            content: content.clone(),
            metadata,
            chunks: vec![DocumentChunk {
                chunk_id: format!("{id}-0"),
                content,
                embedding,
            }],
            created_at: chrono::Utc::now(),
        };
        c.documents.insert(id, doc);
        c.meta.doc_count = c.documents.len();
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: DocumentId) -> Result<(), RagError> {
        let mut collections = self.collections.write();
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        c.documents
            .remove(&id)
            .ok_or_else(|| RagError::DocumentNotFound(id.to_string()))?;
        c.meta.doc_count = c.documents.len();
        Ok(())
    }

    /// Order-stable: ties broken by `DocumentId` so the same index state
    /// always yields the same ranking.
    async fn query(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, RagError> {
        let collections = self.collections.read();
        let c = collections
            .get(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;

        let mut scored: Vec<QueryMatch> = c
            .documents
            .values()
            .map(|doc| {
                let score = doc
                    .chunks
                    .iter()
                    .map(|chunk| cosine_similarity(query_embedding, &chunk.embedding))
                    .fold(f32::MIN, f32::max);
                QueryMatch {
                    id: doc.id,
                    content: doc.content.clone(),
                    score,
                    metadata: doc.metadata.clone(),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn smart_suggest(&self, content: &str) -> Result<Option<String>, RagError> {
        let needle = content.to_lowercase();
        let collections = self.collections.read();
        let mut best: Option<(&str, usize)> = None;
        for c in collections.values() {
            let hits = c
                .meta
                .skills
                .keywords
                .iter()
                .chain(c.meta.skills.topics.iter())
                .filter(|kw| needle.contains(&kw.to_lowercase()))
                .count();
            if hits > 0 && best.map_or(true, |(_, best_hits)| hits > best_hits) {
                best = Some((&c.meta.name, hits));
            }
        }
        Ok(best.map(|(name, _)| name.to_string()))
    }

    async fn smart_insert(
        &self,
        content: String,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
        auto_create: bool,
    ) -> Result<(String, DocumentId), RagError> {
        let target = match self.smart_suggest(&content).await? {
            Some(name) => name,
            None if auto_create => "general".to_string(),
            None => return Err(RagError::NoSuitableCollection),
        };
        if auto_create && !self.collections.read().contains_key(&target) {
            self.create_collection(&target, "auto-created", "general", Skills::default())
                .await?;
        }
        let id = self.insert(&target, content, embedding, metadata).await?;
        Ok((target, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity_descending() {
        let store = InMemoryVectorStore::new();
        store
            .create_collection("docs", "", "general", Skills::default())
            .await
            .unwrap();
        store
            .insert("docs", "a".into(), vec![1.0, 0.0], serde_json::json!({}))
            .await
            .unwrap();
        store
            .insert("docs", "b".into(), vec![0.0, 1.0], serde_json::json!({}))
            .await
            .unwrap();

        let results = store.query("docs", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].content, "a");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn smart_suggest_matches_on_keyword() {
        let store = InMemoryVectorStore::new();
        store
            .create_collection(
                "billing",
                "",
                "finance",
                Skills {
                    keywords: vec!["invoice".into(), "refund".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let suggestion = store.smart_suggest("how do I get a refund").await.unwrap();
        assert_eq!(suggestion, Some("billing".to_string()));
    }

    #[tokio::test]
    async fn insert_into_unknown_collection_fails() {
        let store = InMemoryVectorStore::new();
        let result = store
            .insert("missing", "x".into(), vec![], serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(RagError::CollectionNotFound(_))));
    }

    #[tokio::test]
    async fn smart_insert_auto_creates_fallback_collection() {
        let store = InMemoryVectorStore::new();
        let (collection, _id) = store
            .smart_insert("unrelated text".into(), vec![], serde_json::json!({}), true)
            .await
            .unwrap();
        assert_eq!(collection, "general");
    }
}
