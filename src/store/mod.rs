//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the persistence seam between ingestion and
//! retrieval. Records belong to one named collection and are keyed by
//! `{source_key}#{chunk}`; a source is always replaced wholesale.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_source`](VectorIndex::upsert_source) | Delete a source's records, insert its new chunks |
//! | [`query`](VectorIndex::query) | Nearest neighbours by cosine distance |
//! | [`delete_source`](VectorIndex::delete_source) | Drop every record of one source |
//! | [`count`](VectorIndex::count) / [`ids`](VectorIndex::ids) | Introspection |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{record_id, RecordMetadata, ScoredRecord, VectorRecord};

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace every record of `source_key` with one record per chunk.
    ///
    /// Returns the number of records written. The delete and the inserts
    /// are atomic with respect to other writers.
    async fn upsert_source(
        &self,
        source_key: &str,
        chunks: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, StoreError>;

    /// Up to `k` records ordered by ascending cosine distance.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError>;

    /// Delete every record whose source equals `source_key`.
    async fn delete_source(&self, source_key: &str) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// All record ids, sorted.
    async fn ids(&self) -> Result<Vec<String>, StoreError>;

    /// Distinct source keys with their record counts, sorted by key.
    async fn sources(&self) -> Result<Vec<(String, usize)>, StoreError>;
}

/// Pair chunks with embeddings into records, rejecting length mismatches.
pub(crate) fn build_records(
    source_key: &str,
    chunks: &[String],
    embeddings: &[Vec<f32>],
) -> Result<Vec<VectorRecord>, StoreError> {
    if chunks.len() != embeddings.len() {
        return Err(StoreError::LengthMismatch {
            source_key: source_key.to_string(),
            chunks: chunks.len(),
            embeddings: embeddings.len(),
        });
    }
    Ok(chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (text, embedding))| VectorRecord {
            id: record_id(source_key, i),
            text: text.clone(),
            embedding: embedding.clone(),
            metadata: RecordMetadata {
                source: source_key.to_string(),
                chunk: i,
            },
        })
        .collect())
}

/// Sort by ascending distance (ties by id) and keep the first `k`.
pub(crate) fn nearest(mut hits: Vec<ScoredRecord>, k: usize) -> Vec<ScoredRecord> {
    hits.sort_by(|a, b| {
        let da = a.distance.unwrap_or(f64::INFINITY);
        let db = b.distance.unwrap_or(f64::INFINITY);
        da.partial_cmp(&db)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
