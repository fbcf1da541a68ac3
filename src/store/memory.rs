//! In-memory [`VectorIndex`] for tests and ephemeral runs.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. Queries are a
//! brute-force cosine scan over every record.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::models::{ScoredRecord, VectorRecord};

use super::{build_records, nearest, VectorIndex};

#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<BTreeMap<String, VectorRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, VectorRecord>>, StoreError> {
        self.records
            .read()
            .map_err(|_| StoreError::Unavailable("index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, VectorRecord>>, StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::Unavailable("index lock poisoned".into()))
    }
}

fn remove_source(records: &mut BTreeMap<String, VectorRecord>, source_key: &str) -> usize {
    let before = records.len();
    records.retain(|_, r| r.metadata.source != source_key);
    before - records.len()
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert_source(
        &self,
        source_key: &str,
        chunks: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, StoreError> {
        let new_records = build_records(source_key, chunks, embeddings)?;
        let written = new_records.len();

        let mut records = self.write()?;
        remove_source(&mut records, source_key);
        for record in new_records {
            records.insert(record.id.clone(), record);
        }
        Ok(written)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let records = self.read()?;
        let hits = records
            .values()
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: Some(cosine_distance(embedding, &r.embedding)),
            })
            .collect();
        Ok(nearest(hits, k))
    }

    async fn delete_source(&self, source_key: &str) -> Result<usize, StoreError> {
        let mut records = self.write()?;
        Ok(remove_source(&mut records, source_key))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn sources(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.read()?.values() {
            *counts.entry(record.metadata.source.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
