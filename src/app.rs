//! Service assembly.
//!
//! Builds the embedder and vector index once from [`Settings`] and hands out
//! shared handles to the CLI and server. The answer engine, and with it the
//! generator, is resolved on first use so `ingest` and `stats` never depend
//! on generator credentials.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};

use crate::answer::AnswerEngine;
use crate::config::Settings;
use crate::embedding::{create_embedder, Embedder};
use crate::generate::resolve_generator;
use crate::ingest::Ingestor;
use crate::store::{SqliteIndex, VectorIndex};

pub struct App {
    pub settings: Arc<Settings>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    engine: OnceLock<Arc<AnswerEngine>>,
}

impl App {
    /// Open the persistent SQLite index under `embeddings_path`.
    pub async fn open(settings: Settings) -> Result<Self> {
        let db_path = settings.index_db_path();
        let index = SqliteIndex::open(&db_path, &settings.collection_name)
            .await
            .with_context(|| format!("Failed to open index at {}", db_path.display()))?;
        let embedder = create_embedder(&settings).context("Failed to initialize embedder")?;
        Ok(Self::with_services(settings, embedder, Arc::new(index)))
    }

    /// Assemble from caller-supplied services.
    pub fn with_services(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        tracing::debug!(
            embedder = embedder.model_name(),
            dims = embedder.dims(),
            "services ready"
        );
        Self {
            settings: Arc::new(settings),
            embedder,
            index,
            engine: OnceLock::new(),
        }
    }

    /// The answer engine, resolving the generator from `LLM_MODE` on the
    /// first call. Later calls return the same engine.
    pub fn engine(&self) -> Result<Arc<AnswerEngine>> {
        if let Some(engine) = self.engine.get() {
            return Ok(Arc::clone(engine));
        }
        let generator =
            resolve_generator(&self.settings).context("Failed to initialize generator")?;
        let engine = AnswerEngine::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            generator,
            Arc::clone(&self.settings),
        );
        tracing::debug!(generator = %engine.generator_info().model, "generator ready");
        Ok(Arc::clone(self.engine.get_or_init(|| Arc::new(engine))))
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            Arc::clone(&self.settings),
        )
    }
}
