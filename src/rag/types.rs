//! Knowledge-base data structures (SPEC_FULL.md §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DocumentId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub collection: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub chunks: Vec<DocumentChunk>,
    pub created_at: DateTime<Utc>,
}

/// Metadata the Classifier uses to route queries at a collection, per
/// SPEC_FULL.md's `KBCollection.skills` field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skills {
    pub display_name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub keywords: Vec<String>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbCollection {
    pub name: String,
    pub description: String,
    pub category: String,
    pub doc_count: usize,
    pub skills: Skills,
}

/// One ranked hit from [`crate::rag::VectorStore::query`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: DocumentId,
    pub content: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// A citation surfaced to callers once a [`QueryMatch`] has fed an answer —
/// the document-facing subset of a match, stripped of its raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub score: f32,
}

impl From<&QueryMatch> for Source {
    fn from(m: &QueryMatch) -> Self {
        let title = m
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| m.content.chars().take(60).collect());
        Self {
            id: m.id.to_string(),
            title,
            score: m.score,
        }
    }
}
