//! Query-time retrieval: embed the question, fetch nearest chunks, score
//! them, and summarise attribution by source.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{embed_query, Embedder};
use crate::error::RetrievalError;
use crate::models::{RetrievedContext, SourceSummary};
use crate::store::VectorIndex;

/// Preview length used in answer attribution.
pub const PREVIEW_CHARS: usize = 260;

/// Relevance score `clamp(1 - distance, 0, 1)`.
///
/// `None` when the distance is missing or not finite.
///
/// ```rust
/// use libris::retrieve::distance_to_score;
///
/// assert_eq!(distance_to_score(Some(0.25)), Some(0.75));
/// assert_eq!(distance_to_score(Some(1.7)), Some(0.0));
/// assert_eq!(distance_to_score(Some(f64::NAN)), None);
/// ```
pub fn distance_to_score(distance: Option<f64>) -> Option<f64> {
    distance
        .filter(|d| d.is_finite())
        .map(|d| (1.0 - d).clamp(0.0, 1.0))
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, timeout: Duration) -> Self {
        Self {
            embedder,
            index,
            timeout,
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedContext>, RetrievalError> {
        let embedding = tokio::time::timeout(self.timeout, embed_query(&*self.embedder, question))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "question embedding",
                after: self.timeout,
            })??;

        let hits = tokio::time::timeout(self.timeout, self.index.query(&embedding, top_k))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "index query",
                after: self.timeout,
            })??;

        tracing::debug!(top_k, hits = hits.len(), "retrieved contexts");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedContext {
                score: distance_to_score(hit.distance),
                id: hit.id,
                text: hit.text,
                metadata: hit.metadata,
                distance: hit.distance,
            })
            .collect())
    }

    /// [`retrieve`](Self::retrieve), degrading any failure to no context.
    pub async fn retrieve_or_empty(&self, question: &str, top_k: usize) -> Vec<RetrievedContext> {
        match self.retrieve(question, top_k).await {
            Ok(contexts) => contexts,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, answering without context");
                Vec::new()
            }
        }
    }
}

/// One summary per distinct source; the first (nearest) occurrence wins.
pub fn summarize_sources(contexts: &[RetrievedContext], preview_chars: usize) -> Vec<SourceSummary> {
    let mut seen = HashSet::new();
    contexts
        .iter()
        .filter(|c| seen.insert(c.metadata.source.as_str()))
        .map(|c| SourceSummary {
            source: c.metadata.source.clone(),
            chunk: c.metadata.chunk,
            score: c.score,
            preview: truncate_preview(&c.text, preview_chars),
        })
        .collect()
}

/// Newlines to spaces, trimmed, cut to `max_chars` with a `...` suffix.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::StoreError;
    use crate::models::{RecordMetadata, ScoredRecord};
    use crate::store::MemoryIndex;
    use async_trait::async_trait;

    fn ctx(source: &str, chunk: usize, distance: f64, text: &str) -> RetrievedContext {
        RetrievedContext {
            id: format!("{}#{}", source, chunk),
            text: text.to_string(),
            metadata: RecordMetadata {
                source: source.to_string(),
                chunk,
            },
            distance: Some(distance),
            score: distance_to_score(Some(distance)),
        }
    }

    #[test]
    fn score_is_monotone_and_bounded() {
        let distances = [-0.5, 0.0, 0.1, 0.5, 0.99, 1.0, 1.5, 2.0];
        let scores: Vec<f64> = distances
            .iter()
            .map(|d| distance_to_score(Some(*d)).unwrap())
            .collect();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(distance_to_score(None), None);
        assert_eq!(distance_to_score(Some(f64::INFINITY)), None);
    }

    #[test]
    fn summary_keeps_first_occurrence_per_source() {
        let contexts = vec![
            ctx("texts/a.txt", 2, 0.1, "nearest a"),
            ctx("texts/b.txt", 0, 0.2, "b"),
            ctx("texts/a.txt", 5, 0.3, "farther a"),
        ];
        let summary = summarize_sources(&contexts, PREVIEW_CHARS);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].source, "texts/a.txt");
        assert_eq!(summary[0].chunk, 2);
        assert_eq!(summary[0].preview, "nearest a");
        assert_eq!(summary[1].source, "texts/b.txt");
    }

    #[test]
    fn preview_is_flattened_and_truncated() {
        assert_eq!(truncate_preview("  line one\nline two  ", 260), "line one line two");
        let long = "word ".repeat(100);
        let p = truncate_preview(&long, 12);
        assert_eq!(p, "word word wo...");
        let p = truncate_preview(&long, 10);
        assert_eq!(p, "word word...");
    }

    #[tokio::test]
    async fn retrieve_scores_hits() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let index = Arc::new(MemoryIndex::new());
        let chunks = vec!["negotiation anchors".to_string(), "brand voice".to_string()];
        let vectors = embedder.embed(&chunks).await.unwrap();
        index.upsert_source("texts/n.md", &chunks, &vectors).await.unwrap();

        let retriever = Retriever::new(embedder, index, Duration::from_secs(5));
        let hits = retriever.retrieve("negotiation anchors", 2).await.unwrap();
        assert_eq!(hits[0].id, "texts/n.md#0");
        assert!(hits[0].score.unwrap() > 0.99);
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn upsert_source(&self, _: &str, _: &[String], _: &[Vec<f32>]) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn query(&self, _: &[f32], _: usize) -> Result<Vec<ScoredRecord>, StoreError> {
            Err(StoreError::Query("no such table: records".into()))
        }
        async fn delete_source(&self, _: &str) -> Result<usize, StoreError> {
            Ok(0)
        }
        async fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
        async fn ids(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn sources(&self) -> Result<Vec<(String, usize)>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn backend_error_is_typed_then_degraded() {
        let retriever = Retriever::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(BrokenIndex),
            Duration::from_secs(5),
        );
        let err = retriever.retrieve("anything", 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Store(_)));
        assert!(retriever.retrieve_or_empty("anything", 3).await.is_empty());
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::error::EmbedError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn slow_embedding_times_out_and_degrades_to_empty() {
        let retriever = Retriever::new(
            Arc::new(SlowEmbedder),
            Arc::new(MemoryIndex::new()),
            Duration::from_millis(100),
        );

        let err = retriever.retrieve("anything", 3).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Timeout {
                stage: "question embedding",
                ..
            }
        ));

        let started = std::time::Instant::now();
        assert!(retriever.retrieve_or_empty("anything", 3).await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
