//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and three backends:
//! - **[`LocalEmbedder`]**: runs a sentence-embedding model in-process via
//!   fastembed. No network calls after the model is downloaded.
//! - **[`HashEmbedder`]**: deterministic feature-hashing bag of words. No model,
//!   no network; used for tests and builds without the fastembed feature.
//! - **[`OpenAIEmbedder`]**: batched calls to the OpenAI embeddings API with
//!   retry and backoff (see [`crate::http`]).
//!
//! Also provides vector helpers used by the index:
//! - [`cosine_similarity`] and [`cosine_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! # Provider Selection
//!
//! [`create_embedder`] picks the backend from [`Settings`]:
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `"local"` | [`LocalEmbedder`] (feature `local-embeddings-fastembed`) |
//! | `"hash"` | [`HashEmbedder`] |
//! | `"openai"` (or `USE_OPENAI_EMBEDDINGS=true`) | [`OpenAIEmbedder`] |

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::error::EmbedError;
use crate::http::{self, PostFailure};

/// Maps texts to fixed-dimensionality vectors.
///
/// Implementations must return exactly one vector per input, in input
/// order, and must return an empty list for empty input without touching
/// the backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
    let mut results = embedder.embed(&[text.to_string()]).await?;
    match results.len() {
        1 => Ok(results.remove(0)),
        got => Err(EmbedError::Shape { expected: 1, got }),
    }
}

/// Create the embedder selected by `settings`.
pub fn create_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>, EmbedError> {
    match settings.effective_embedding_provider() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(settings)?)),
        "hash" => Ok(Arc::new(HashEmbedder::default())),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(&settings.local_embedding_model)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(EmbedError::Unavailable(
            "local embeddings require --features local-embeddings-fastembed; \
             set EMBEDDING_PROVIDER=hash for a model-free fallback"
                .to_string(),
        )),
        other => Err(EmbedError::Unavailable(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Hashing Embedder ============

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a ±1 sign, and the result is L2-normalised. Texts
/// sharing vocabulary land close together under cosine distance.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(raw);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI Embedder ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {api_base}/embeddings` with the whole batch in one request.
/// Failures are returned to the caller, never masked.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns [`EmbedError::Unavailable`] if no API key is configured.
    pub fn new(settings: &Settings) -> Result<Self, EmbedError> {
        let api_key = settings.openai_api_key.clone().ok_or_else(|| {
            EmbedError::Unavailable("OPENAI_API_KEY is required for OpenAI embeddings".into())
        })?;
        let client = http::build_client(settings.request_timeout_secs)
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        Ok(Self {
            dims: openai_dims(&settings.embedding_model),
            model: settings.embedding_model.clone(),
            url: format!("{}/embeddings", settings.openai_api_base.trim_end_matches('/')),
            api_key,
            max_retries: settings.max_retries,
            client,
        })
    }
}

fn openai_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        _ => 1536,
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json_with_retry(
            &self.client,
            &self.url,
            &self.api_key,
            &body,
            self.max_retries,
        )
        .await
        .map_err(|f| match f {
            PostFailure::Status { status, body } => EmbedError::Api { status, body },
            PostFailure::Transport(e) => EmbedError::Request(e),
        })?;

        let vectors = parse_openai_response(&json)?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::Shape {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::InvalidResponse("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::InvalidResponse("missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Local Embedder (fastembed) ============

/// In-process sentence embedding via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached; it
/// is initialised lazily and reused for every later batch.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    kind: fastembed::EmbeddingModel,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(model_name: &str) -> Result<Self, EmbedError> {
        let (kind, dims) = fastembed_model(model_name)?;
        Ok(Self {
            model_name: model_name.to_string(),
            dims,
            kind,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize), EmbedError> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        other => Err(EmbedError::Unavailable(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let texts = texts.to_vec();
        let slot = Arc::clone(&self.model);
        let kind = self.kind.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| EmbedError::Inference("model lock poisoned".into()))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| EmbedError::Unavailable("model not initialised".into()))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbedError::Inference(e.to_string()))
        })
        .await
        .map_err(|e| EmbedError::Inference(e.to_string()))?
    }
}

// ============ Vector helpers ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use libris::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, zero or
/// mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance `1 - similarity`, in `[0.0, 2.0]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_order_preserving() {
        let e = HashEmbedder::new(64);
        let texts = vec!["sales and brand".to_string(), "negotiation".to_string()];
        let a = e.embed(&texts).await.unwrap();
        let b = e.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|v| v.len() == 64));
        assert_ne!(a[0], a[1]);
    }

    #[tokio::test]
    async fn hash_embedder_empty_input() {
        let e = HashEmbedder::default();
        assert!(e.embed(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hash_embedder_shared_words_are_closer() {
        let e = HashEmbedder::default();
        let v = e
            .embed(&[
                "automation unlocks leverage".to_string(),
                "Automation and leverage".to_string(),
                "quantum chromodynamics lecture".to_string(),
            ])
            .await
            .unwrap();
        assert!(cosine_distance(&v[0], &v[1]) < cosine_distance(&v[0], &v[2]));
    }

    #[test]
    fn parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn parse_openai_response_rejects_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse(_)));
    }

    #[test]
    fn openai_requires_api_key() {
        let settings = Settings {
            use_openai_embeddings: true,
            ..Settings::default()
        };
        assert!(matches!(
            create_embedder(&settings),
            Err(EmbedError::Unavailable(_))
        ));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0 < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
