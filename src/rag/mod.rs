//! Vector Store Facade (SPEC_FULL.md §4.4): knowledge-base collections,
//! document ingestion, and similarity query behind a backend-agnostic trait.

pub mod store;
pub mod types;

pub use store::{InMemoryVectorStore, VectorStore};
pub use types::{
    Document, DocumentChunk, KbCollection, QueryMatch, Skills, Source,
};

const EMBEDDING_DIMS: usize = 32;

/// Deterministic placeholder embedding: a real deployment plugs in whatever
/// model its `VectorStore` backend expects (SPEC_FULL.md §9 — the embedding
/// model is a configuration point external to this facade). This hashes the
/// text into a fixed-length unit vector so identical input always queries
/// and inserts against identical coordinates, which is all the in-process
/// `InMemoryVectorStore` needs to behave deterministically in tests.
pub fn placeholder_embedding(text: &str) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let mut digest = Sha256::digest(text.as_bytes()).to_vec();
    while digest.len() < EMBEDDING_DIMS {
        digest.extend_from_slice(&Sha256::digest(&digest));
    }
    let raw: Vec<f32> = digest[..EMBEDDING_DIMS]
        .iter()
        .map(|b| (*b as f32 / 255.0) * 2.0 - 1.0)
        .collect();
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        raw
    } else {
        raw.into_iter().map(|x| x / norm).collect()
    }
}
