//! Typed errors for each pipeline stage.
//!
//! Core components return these; the CLI and config glue wrap them in
//! `anyhow`. The answer flow degrades on [`RetrievalError`] and only
//! surfaces [`AnswerError`] to callers.

use std::time::Duration;

use thiserror::Error;

/// Document extraction failures. Always recovered as empty text by
/// [`crate::extract::extract_text`].
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("EPUB extraction failed: {0}")]
    Epub(String),

    #[error("unsupported file suffix: {0}")]
    UnsupportedSuffix(String),
}

/// Embedding backend failures.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding provider not available: {0}")]
    Unavailable(String),

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),

    #[error("embedding count mismatch: expected {expected}, got {got}")]
    Shape { expected: usize, got: usize },

    #[error("local inference failed: {0}")]
    Inference(String),
}

/// Vector index failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("index query failed: {0}")]
    Query(String),

    #[error("index write failed: {0}")]
    Write(String),

    #[error("{chunks} chunks but {embeddings} embeddings for {source_key}")]
    LengthMismatch {
        source_key: String,
        chunks: usize,
        embeddings: usize,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Query-time retrieval failures. The answer flow converts these to an
/// empty context list.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("question embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("index query failed: {0}")]
    Store(#[from] StoreError),

    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
}

/// Generator initialization and call failures.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("LLM_MODE is online but no API key is configured")]
    MissingCredential,

    #[error("unknown generator mode: '{0}'. Must be offline, online, or auto")]
    UnknownMode(String),

    #[error("generator initialization failed: {0}")]
    Init(String),

    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("completion response invalid: {0}")]
    InvalidResponse(String),
}

/// Errors returned from [`crate::answer::AnswerEngine::answer`].
#[derive(Error, Debug)]
pub enum AnswerError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_error_wraps_store_error() {
        let err: RetrievalError = StoreError::Query("no such table".into()).into();
        assert!(matches!(err, RetrievalError::Store(_)));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn timeout_display_names_stage() {
        let err = RetrievalError::Timeout {
            stage: "index query",
            after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "index query timed out after 3s");
    }

    #[test]
    fn length_mismatch_display() {
        let err = StoreError::LengthMismatch {
            source_key: "books/a.txt".into(),
            chunks: 3,
            embeddings: 2,
        };
        assert_eq!(err.to_string(), "3 chunks but 2 embeddings for books/a.txt");
    }

    #[test]
    fn answer_error_from_generate_error() {
        let err: AnswerError = GenerateError::MissingCredential.into();
        assert!(matches!(err, AnswerError::Generation(_)));
    }
}
