//! Answer generators.
//!
//! Two implementations of [`Generator`]:
//! - **[`OfflineGenerator`]**: deterministic, rule-based digest of the
//!   prompt. Never fails and needs no network.
//! - **[`OpenAIGenerator`]**: `POST {api_base}/chat/completions` with the
//!   same retry policy as remote embeddings.
//!
//! [`resolve_generator`] chooses once at startup from `LLM_MODE`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::GenerateError;
use crate::http::{self, PostFailure};

/// Model name reported by [`OfflineGenerator`].
pub const OFFLINE_MODEL: &str = "rule-based-summariser";

const MAX_SNIPPET_CHARS: usize = 220;
const MAX_SNIPPETS: usize = 3;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerateError>;

    /// `"offline"` or `"online"`.
    fn mode(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Parsed `LLM_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorMode {
    Offline,
    Online,
    Auto,
}

impl std::str::FromStr for GeneratorMode {
    type Err = GenerateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "offline" => Ok(GeneratorMode::Offline),
            "online" | "openai" => Ok(GeneratorMode::Online),
            "auto" | "" => Ok(GeneratorMode::Auto),
            other => Err(GenerateError::UnknownMode(other.to_string())),
        }
    }
}

// ============ Offline ============

#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGenerator;

impl OfflineGenerator {
    /// Build the offline response from the system and user prompts.
    pub fn respond(&self, system: &str, user: &str) -> String {
        let (snippets, question) = parse_user_prompt(user);

        let mut parts = vec!["Offline libris response".to_string()];
        if !system.trim().is_empty() {
            parts.push(format!("System focus: {}", system.trim()));
        }
        if !question.is_empty() {
            parts.push(format!("Question: {}", question));
        }
        if !snippets.is_empty() {
            parts.push("Context highlights:".to_string());
            for snippet in snippets.iter().take(MAX_SNIPPETS) {
                parts.push(format!("- {}", snippet));
            }
        }
        parts.push(
            "Guidance: leverage available context, run small experiments, and automate repeatable wins."
                .to_string(),
        );
        parts.join("\n")
    }
}

/// Split `Context:\n...\n\nQuestion: ...` into collapsed snippets and the
/// question. Without a `Context:` marker the whole prompt is the question.
fn parse_user_prompt(user: &str) -> (Vec<String>, String) {
    let Some((_, after)) = user.split_once("Context:") else {
        return (Vec::new(), collapse_whitespace(user));
    };
    let (context_body, question) = after.split_once("Question:").unwrap_or((after, ""));

    let snippets: Vec<String> = context_body
        .split("\n---")
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(MAX_SNIPPET_CHARS).collect())
        .collect();
    (snippets, collapse_whitespace(question))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Generator for OfflineGenerator {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, GenerateError> {
        Ok(self.respond(system, user))
    }

    fn mode(&self) -> &str {
        "offline"
    }

    fn model_name(&self) -> &str {
        OFFLINE_MODEL
    }
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(settings: &Settings) -> Result<Self, GenerateError> {
        let api_key = settings
            .openai_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(GenerateError::MissingCredential)?;
        let client = http::build_client(settings.request_timeout_secs)
            .map_err(|e| GenerateError::Init(e.to_string()))?;
        Ok(Self {
            model: settings.openai_model.clone(),
            url: format!(
                "{}/chat/completions",
                settings.openai_api_base.trim_end_matches('/')
            ),
            api_key,
            max_retries: settings.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerateError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
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
            PostFailure::Status { status, body } => GenerateError::Api { status, body },
            PostFailure::Transport(e) => GenerateError::Request(e),
        })?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| GenerateError::InvalidResponse("missing choices[0].message.content".into()))
    }

    fn mode(&self) -> &str {
        "online"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============ Resolution ============

/// The generator chosen at startup, plus the offline fallback used when a
/// remote call fails under `auto`.
#[derive(Clone)]
pub struct ResolvedGenerator {
    pub primary: Arc<dyn Generator>,
    pub fallback: Option<Arc<dyn Generator>>,
}

impl ResolvedGenerator {
    pub fn offline() -> Self {
        Self {
            primary: Arc::new(OfflineGenerator),
            fallback: None,
        }
    }
}

pub fn resolve_generator(settings: &Settings) -> Result<ResolvedGenerator, GenerateError> {
    let mode: GeneratorMode = settings.llm_mode.parse()?;
    match mode {
        GeneratorMode::Offline => Ok(ResolvedGenerator::offline()),
        GeneratorMode::Online => {
            let remote = OpenAIGenerator::new(settings)?;
            Ok(ResolvedGenerator {
                primary: Arc::new(remote),
                fallback: None,
            })
        }
        GeneratorMode::Auto => {
            if !settings.has_api_key() {
                tracing::info!("no API key configured, using offline generator");
                return Ok(ResolvedGenerator::offline());
            }
            match OpenAIGenerator::new(settings) {
                Ok(remote) => Ok(ResolvedGenerator {
                    primary: Arc::new(remote),
                    fallback: Some(Arc::new(OfflineGenerator)),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "remote generator unavailable, using offline");
                    Ok(ResolvedGenerator::offline())
                }
            }
        }
    }
}
