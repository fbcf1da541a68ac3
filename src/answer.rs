//! Answer composition: retrieve, build the grounded prompt, generate, and
//! attach source attribution.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::AnswerError;
use crate::generate::{Generator, ResolvedGenerator};
use crate::models::{
    AnswerConfig, AnswerRequest, AnswerResponse, GeneratorInfo, RetrievedContext, SourceSummary,
};
use crate::retrieve::{summarize_sources, Retriever, PREVIEW_CHARS};
use crate::store::VectorIndex;

pub const SYSTEM_PROMPT: &str = "You are an elite business coach. \
Use insights from context only, focused on scaling, sales, psychology, negotiation, brand and automation.";

const NO_CONTEXT: &str = "No relevant context was retrieved from the knowledge base.";
const MAX_LISTED_SOURCES: usize = 5;

/// `[Source n]` blocks joined by `---` separators.
pub fn format_prompt_context(contexts: &[RetrievedContext]) -> String {
    if contexts.is_empty() {
        return NO_CONTEXT.to_string();
    }
    contexts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[Source {}]\n{}", i + 1, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub fn build_user_prompt(question: &str, contexts: &[RetrievedContext]) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}",
        format_prompt_context(contexts),
        question
    )
}

/// Append a `Sources:` list unless the answer already cites sources.
pub fn append_sources(raw_answer: &str, sources: &[SourceSummary]) -> String {
    if raw_answer.contains("Sources") || sources.is_empty() {
        return raw_answer.to_string();
    }
    let listed: Vec<&str> = sources
        .iter()
        .take(MAX_LISTED_SOURCES)
        .map(|s| s.source.as_str())
        .collect();
    format!("{}\n\nSources:\n{}", raw_answer, listed.join("\n"))
}

pub struct AnswerEngine {
    retriever: Retriever,
    generator: ResolvedGenerator,
    settings: Arc<Settings>,
}

impl AnswerEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: ResolvedGenerator,
        settings: Arc<Settings>,
    ) -> Self {
        let timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        Self {
            retriever: Retriever::new(embedder, index, timeout),
            generator,
            settings,
        }
    }

    /// The generator selected at startup.
    pub fn generator_info(&self) -> GeneratorInfo {
        info_of(&*self.generator.primary)
    }

    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse, AnswerError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AnswerError::EmptyQuestion);
        }
        let config = AnswerConfig {
            top_k: request.top_k.unwrap_or(self.settings.top_k),
            temperature: request.temperature.unwrap_or(self.settings.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
        };
        if config.top_k == 0 {
            return Err(AnswerError::InvalidRequest("top_k must be >= 1".into()));
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(AnswerError::InvalidRequest(
                "temperature must be in [0.0, 2.0]".into(),
            ));
        }

        let contexts = self.retriever.retrieve_or_empty(question, config.top_k).await;
        let prompt = build_user_prompt(question, &contexts);

        let primary = &self.generator.primary;
        let (raw_answer, generator) = match primary
            .generate(SYSTEM_PROMPT, &prompt, config.temperature, config.max_tokens)
            .await
        {
            Ok(text) => (text, info_of(&**primary)),
            Err(e) => match &self.generator.fallback {
                Some(fallback) => {
                    tracing::warn!(error = %e, "remote generation failed, using offline fallback");
                    let text = fallback
                        .generate(SYSTEM_PROMPT, &prompt, config.temperature, config.max_tokens)
                        .await?;
                    (text, info_of(&**fallback))
                }
                None => return Err(AnswerError::Generation(e)),
            },
        };

        let sources = summarize_sources(&contexts, PREVIEW_CHARS);
        let answer = append_sources(&raw_answer, &sources);

        Ok(AnswerResponse {
            question: question.to_string(),
            answer,
            raw_answer,
            sources,
            contexts,
            prompt,
            config,
            generator,
        })
    }
}

fn info_of(generator: &dyn Generator) -> GeneratorInfo {
    GeneratorInfo {
        mode: generator.mode().to_string(),
        model: generator.model_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::GenerateError;
    use crate::generate::OfflineGenerator;
    use crate::models::RecordMetadata;
    use crate::store::MemoryIndex;
    use async_trait::async_trait;

    struct FailingRemote;

    #[async_trait]
    impl Generator for FailingRemote {
        async fn generate(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String, GenerateError> {
            Err(GenerateError::Api {
                status: 503,
                body: "overloaded".into(),
            })
        }
        fn mode(&self) -> &str {
            "online"
        }
        fn model_name(&self) -> &str {
            "gpt-4o-mini"
        }
    }

    fn summary(source: &str) -> SourceSummary {
        SourceSummary {
            source: source.to_string(),
            chunk: 0,
            score: Some(0.5),
            preview: String::new(),
        }
    }

    async fn engine_with(generator: ResolvedGenerator) -> AnswerEngine {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let index = Arc::new(MemoryIndex::new());
        let chunks = vec!["Automation unlocks leverage for small teams.".to_string()];
        let vectors = embedder.embed(&chunks).await.unwrap();
        index.upsert_source("texts/ops.md", &chunks, &vectors).await.unwrap();
        AnswerEngine::new(embedder, index, generator, Arc::new(Settings::default()))
    }

    #[test]
    fn prompt_blocks_are_numbered_and_trimmed() {
        let contexts = vec![
            RetrievedContext {
                id: "a#0".into(),
                text: "  first \n".into(),
                metadata: RecordMetadata { source: "a".into(), chunk: 0 },
                distance: None,
                score: None,
            },
            RetrievedContext {
                id: "b#0".into(),
                text: "second".into(),
                metadata: RecordMetadata { source: "b".into(), chunk: 0 },
                distance: None,
                score: None,
            },
        ];
        assert_eq!(
            build_user_prompt("why?", &contexts),
            "Context:\n[Source 1]\nfirst\n---\n[Source 2]\nsecond\n\nQuestion: why?"
        );
        assert_eq!(
            build_user_prompt("why?", &[]),
            format!("Context:\n{}\n\nQuestion: why?", NO_CONTEXT)
        );
    }

    #[test]
    fn sources_are_appended_once_and_capped() {
        let many: Vec<SourceSummary> = (0..7).map(|i| summary(&format!("s{}", i))).collect();
        let out = append_sources("Answer.", &many);
        assert_eq!(out, "Answer.\n\nSources:\ns0\ns1\ns2\ns3\ns4");

        assert_eq!(append_sources("Sources: cited inline", &many), "Sources: cited inline");
        assert_eq!(append_sources("Answer.", &[]), "Answer.");
    }

    #[tokio::test]
    async fn rejects_empty_question_and_zero_top_k() {
        let engine = engine_with(ResolvedGenerator::offline()).await;
        assert!(matches!(
            engine.answer(AnswerRequest::new("   ")).await,
            Err(AnswerError::EmptyQuestion)
        ));
        let request = AnswerRequest {
            top_k: Some(0),
            ..AnswerRequest::new("q")
        };
        assert!(matches!(
            engine.answer(request).await,
            Err(AnswerError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn offline_answer_is_deterministic() {
        let engine = engine_with(ResolvedGenerator::offline()).await;
        let a = engine.answer(AnswerRequest::new("How does automation help?")).await.unwrap();
        let b = engine.answer(AnswerRequest::new("How does automation help?")).await.unwrap();
        assert_eq!(a.answer, b.answer);
        assert_eq!(a.generator.mode, "offline");
        assert!(a.answer.ends_with("Sources:\ntexts/ops.md"));
        assert_eq!(a.config.top_k, 6);
    }

    #[tokio::test]
    async fn auto_falls_back_per_call() {
        let engine = engine_with(ResolvedGenerator {
            primary: Arc::new(FailingRemote),
            fallback: Some(Arc::new(OfflineGenerator)),
        })
        .await;
        let resp = engine.answer(AnswerRequest::new("automation?")).await.unwrap();
        assert_eq!(resp.generator.mode, "offline");
        assert_eq!(resp.generator.model, "rule-based-summariser");
        assert!(resp.raw_answer.starts_with("Offline libris response"));
        assert_eq!(engine.generator_info().mode, "online");
    }

    #[tokio::test]
    async fn online_failure_is_surfaced() {
        let engine = engine_with(ResolvedGenerator {
            primary: Arc::new(FailingRemote),
            fallback: None,
        })
        .await;
        let err = engine.answer(AnswerRequest::new("automation?")).await.unwrap_err();
        assert!(matches!(
            err,
            AnswerError::Generation(GenerateError::Api { status: 503, .. })
        ));
    }
}
