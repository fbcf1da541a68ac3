//! Core data types that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A discovered file plus the configured directory it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub base_dir: PathBuf,
}

impl SourceDocument {
    pub fn new(path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base_dir: base_dir.into(),
        }
    }

    /// Stable logical identifier: `{base dir name}/{relative path}` with
    /// `/` separators on every platform.
    pub fn source_key(&self) -> String {
        let base_name = self
            .base_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let relative = self.path.strip_prefix(&self.base_dir).unwrap_or(&self.path);
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        if base_name.is_empty() {
            rel
        } else {
            format!("{}/{}", base_name, rel)
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Record id for chunk `index` of `source_key`.
pub fn record_id(source_key: &str, index: usize) -> String {
    format!("{}#{}", source_key, index)
}

/// Metadata stored alongside every vector record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub chunk: usize,
}

/// A persisted chunk with its embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// A record returned from a nearest-neighbor query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: RecordMetadata,
    pub distance: Option<f64>,
}

/// One retrieved passage for a single query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub id: String,
    pub text: String,
    pub metadata: RecordMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Per-source attribution entry shown with an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub chunk: usize,
    pub score: Option<f64>,
    pub preview: String,
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files stored with at least one chunk.
    pub files: usize,
    /// Total chunks stored.
    pub chunks: usize,
    /// Candidate files discovered.
    pub scanned: usize,
    /// Files with no extractable text or no chunks.
    pub skipped: usize,
    /// Files whose extraction, embedding or upsert failed.
    pub failed: usize,
}

/// A single question plus optional per-request overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

/// Effective generation parameters used for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnswerConfig {
    pub top_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Which generator produced an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratorInfo {
    pub mode: String,
    pub model: String,
}

/// Full answer payload returned to the CLI and HTTP callers.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub question: String,
    pub answer: String,
    pub raw_answer: String,
    pub sources: Vec<SourceSummary>,
    pub contexts: Vec<RetrievedContext>,
    pub prompt: String,
    pub config: AnswerConfig,
    pub generator: GeneratorInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_prefixes_base_dir_name() {
        let doc = SourceDocument::new("/lib/books/sales/closing.pdf", "/lib/books");
        assert_eq!(doc.source_key(), "books/sales/closing.pdf");
        assert_eq!(doc.file_name(), "closing.pdf");
    }

    #[test]
    fn source_key_is_stable() {
        let a = SourceDocument::new("/x/texts/a.txt", "/x/texts");
        let b = SourceDocument::new("/x/texts/a.txt", "/x/texts");
        assert_eq!(a.source_key(), b.source_key());
    }

    #[test]
    fn record_id_format() {
        assert_eq!(record_id("texts/a.txt", 3), "texts/a.txt#3");
    }

    #[test]
    fn answer_request_deserializes_with_defaults() {
        let req: AnswerRequest = serde_json::from_str(r#"{"question":"why?"}"#).unwrap();
        assert_eq!(req.question, "why?");
        assert!(req.top_k.is_none());
        assert!(req.max_tokens.is_none());
    }
}
