//! Process-wide settings.
//!
//! Settings are resolved once at startup in three layers:
//!
//! 1. Built-in defaults (see the `default_*` functions below).
//! 2. An optional TOML file passed via `--config`, whose keys mirror the
//!    field names of [`Settings`].
//! 3. Environment variables (`TOP_K`, `LLM_MODE`, `SOURCE_DIRS`, ...).
//!
//! The result is validated and then shared read-only (behind an `Arc`) by
//! every component. Unparseable numeric or boolean environment values fall
//! back to the layer below rather than failing startup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Chat model used by the online generator.
    pub openai_model: String,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    /// `offline`, `online` (alias `openai`) or `auto`.
    pub llm_mode: String,
    pub top_k: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Legacy toggle: forces the `openai` embedding provider when set.
    pub use_openai_embeddings: bool,
    /// `local`, `hash` or `openai`.
    pub embedding_provider: String,
    /// Remote embedding model.
    pub embedding_model: String,
    pub local_embedding_model: String,
    pub embeddings_path: PathBuf,
    pub collection_name: String,
    pub source_dirs: Vec<PathBuf>,
    pub supported_suffixes: Vec<String>,
    pub text_suffixes: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub ingest_concurrency: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub server_bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_model: default_openai_model(),
            openai_api_key: None,
            openai_api_base: default_api_base(),
            llm_mode: "auto".to_string(),
            top_k: 6,
            max_tokens: 900,
            temperature: 0.3,
            use_openai_embeddings: false,
            embedding_provider: "local".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            local_embedding_model: "all-minilm-l6-v2".to_string(),
            embeddings_path: PathBuf::from("embeddings"),
            collection_name: "knowledge".to_string(),
            source_dirs: default_source_dirs(),
            supported_suffixes: to_strings(&[".pdf", ".epub", ".txt", ".md", ".mdx"]),
            text_suffixes: to_strings(&[".txt", ".md", ".mdx"]),
            chunk_size: 1000,
            chunk_overlap: 150,
            ingest_concurrency: 4,
            request_timeout_secs: 30,
            max_retries: 3,
            server_bind: "127.0.0.1:8000".to_string(),
        }
    }
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_source_dirs() -> Vec<PathBuf> {
    ["books", "texts", "data"].iter().map(PathBuf::from).collect()
}
fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Settings {
    /// Resolve settings from an optional TOML file and the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file_contents = match config_path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            ),
            None => None,
        };
        Self::resolve(file_contents.as_deref(), |key| std::env::var(key).ok())
    }

    /// Defaults plus overrides from `lookup`, no config file.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(None, lookup)
    }

    /// Resolve settings from TOML text (if any) plus an arbitrary key lookup.
    ///
    /// Tests pass a closure over a `HashMap` instead of mutating the real
    /// environment.
    pub fn resolve<F>(toml_text: Option<&str>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings: Settings = match toml_text {
            Some(text) => toml::from_str(text).context("Failed to parse config file")?,
            None => Settings::default(),
        };
        settings.apply_overrides(&lookup);
        settings.normalize(&lookup);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_MODEL") {
            self.openai_model = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_API_BASE") {
            self.openai_api_base = v;
        }
        if let Some(v) = get("LLM_MODE") {
            self.llm_mode = v;
        }
        self.top_k = parse_or(get("TOP_K"), self.top_k);
        self.max_tokens = parse_or(get("MAX_TOKENS"), self.max_tokens);
        self.temperature = parse_or(get("TEMPERATURE"), self.temperature);
        self.use_openai_embeddings =
            parse_bool(get("USE_OPENAI_EMBEDDINGS"), self.use_openai_embeddings);
        if let Some(v) = get("EMBEDDING_PROVIDER") {
            self.embedding_provider = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(v) = get("LOCAL_EMBEDDING_MODEL") {
            self.local_embedding_model = v;
        }
        if let Some(v) = get("EMBEDDINGS_PATH") {
            self.embeddings_path = PathBuf::from(v);
        }
        if let Some(v) = get("COLLECTION_NAME") {
            self.collection_name = v;
        }
        if let Some(v) = get("SOURCE_DIRS") {
            let dirs: Vec<PathBuf> = split_list(&v).into_iter().map(PathBuf::from).collect();
            if !dirs.is_empty() {
                self.source_dirs = dirs;
            }
        }
        if let Some(v) = get("SUPPORTED_SUFFIXES") {
            self.supported_suffixes = split_list(&v);
        }
        if let Some(v) = get("TEXT_SUFFIXES") {
            self.text_suffixes = split_list(&v);
        }
        self.chunk_size = parse_or(get("CHUNK_SIZE"), self.chunk_size);
        self.chunk_overlap = parse_or(get("CHUNK_OVERLAP"), self.chunk_overlap);
        self.ingest_concurrency = parse_or(get("INGEST_CONCURRENCY"), self.ingest_concurrency);
        self.request_timeout_secs =
            parse_or(get("REQUEST_TIMEOUT_SECS"), self.request_timeout_secs);
        self.max_retries = parse_or(get("MAX_RETRIES"), self.max_retries);
        if let Some(v) = get("SERVER_BIND") {
            self.server_bind = v;
        }
    }

    /// Lowercase mode/provider names, normalize suffixes to `.ext`, expand `~`.
    fn normalize<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.llm_mode = self.llm_mode.trim().to_lowercase();
        self.embedding_provider = self.embedding_provider.trim().to_lowercase();
        if self
            .openai_api_key
            .as_deref()
            .is_some_and(|k| k.trim().is_empty())
        {
            self.openai_api_key = None;
        }
        self.supported_suffixes = normalize_suffixes(&self.supported_suffixes);
        self.text_suffixes = normalize_suffixes(&self.text_suffixes);

        let home = lookup("HOME");
        self.embeddings_path = expand_home(&self.embeddings_path, home.as_deref());
        self.source_dirs = self
            .source_dirs
            .iter()
            .map(|p| expand_home(p, home.as_deref()))
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.top_k == 0 {
            bail!("top_k must be >= 1");
        }
        if self.ingest_concurrency == 0 {
            bail!("ingest_concurrency must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("temperature must be in [0.0, 2.0]");
        }
        match self.llm_mode.as_str() {
            "offline" | "online" | "openai" | "auto" => {}
            other => bail!(
                "Unknown LLM_MODE: '{}'. Must be offline, online, or auto.",
                other
            ),
        }
        match self.embedding_provider.as_str() {
            "local" | "hash" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local, hash, or openai.",
                other
            ),
        }
        if self.supported_suffixes.is_empty() {
            bail!("supported_suffixes must not be empty");
        }
        Ok(())
    }

    /// Embedding provider after applying the `USE_OPENAI_EMBEDDINGS` toggle.
    pub fn effective_embedding_provider(&self) -> &str {
        if self.use_openai_embeddings {
            "openai"
        } else {
            self.embedding_provider.as_str()
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.openai_api_key.is_some()
    }

    pub fn is_supported(&self, suffix: &str) -> bool {
        self.supported_suffixes.iter().any(|s| s == suffix)
    }

    pub fn is_text(&self, suffix: &str) -> bool {
        self.text_suffixes.iter().any(|s| s == suffix)
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.embeddings_path.join("index.sqlite")
    }
}

/// Lowercase `.ext` suffix of a path, or an empty string.
pub fn path_suffix(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, fallback: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(fallback)
}

fn parse_bool(value: Option<String>, fallback: bool) -> bool {
    match value {
        Some(v) => matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => fallback,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn normalize_suffixes(suffixes: &[String]) -> Vec<String> {
    suffixes
        .iter()
        .map(|s| {
            let s = s.trim().to_lowercase();
            if s.starts_with('.') {
                s
            } else {
                format!(".{}", s)
            }
        })
        .filter(|s| s.len() > 1)
        .collect()
}

fn expand_home(path: &Path, home: Option<&str>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => Path::new(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::resolve(None, |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = resolve_with(&[]).unwrap();
        assert_eq!(s.top_k, 6);
        assert_eq!(s.max_tokens, 900);
        assert!((s.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(s.llm_mode, "auto");
        assert_eq!(s.chunk_size, 1000);
        assert_eq!(s.chunk_overlap, 150);
        assert_eq!(s.source_dirs.len(), 3);
        assert!(s.is_supported(".epub"));
        assert!(!s.is_text(".pdf"));
        assert!(!s.has_api_key());
    }

    #[test]
    fn env_overrides_defaults() {
        let s = resolve_with(&[
            ("TOP_K", "3"),
            ("LLM_MODE", "OFFLINE"),
            ("SOURCE_DIRS", "a, b ,,c"),
            ("USE_OPENAI_EMBEDDINGS", "Yes"),
            ("TEXT_SUFFIXES", "txt,.RST"),
        ])
        .unwrap();
        assert_eq!(s.top_k, 3);
        assert_eq!(s.llm_mode, "offline");
        assert_eq!(
            s.source_dirs,
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
        assert_eq!(s.effective_embedding_provider(), "openai");
        assert_eq!(s.text_suffixes, vec![".txt".to_string(), ".rst".to_string()]);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let s = resolve_with(&[("TOP_K", "many"), ("TEMPERATURE", "warm")]).unwrap();
        assert_eq!(s.top_k, 6);
        assert!((s.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_api_key_is_absent() {
        let s = resolve_with(&[("OPENAI_API_KEY", "  ")]).unwrap();
        assert!(!s.has_api_key());
    }

    #[test]
    fn toml_file_layer_then_env() {
        let toml_text = r#"
            top_k = 9
            llm_mode = "offline"
            source_dirs = ["library"]
        "#;
        let s = Settings::resolve(Some(toml_text), |k| {
            (k == "TOP_K").then(|| "2".to_string())
        })
        .unwrap();
        assert_eq!(s.top_k, 2);
        assert_eq!(s.llm_mode, "offline");
        assert_eq!(s.source_dirs, vec![PathBuf::from("library")]);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = resolve_with(&[("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")]).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = resolve_with(&[("LLM_MODE", "sometimes")]).unwrap_err();
        assert!(err.to_string().contains("LLM_MODE"));
    }

    #[test]
    fn expands_home_directory() {
        let s = resolve_with(&[("HOME", "/home/reader"), ("EMBEDDINGS_PATH", "~/idx")]).unwrap();
        assert_eq!(s.embeddings_path, PathBuf::from("/home/reader/idx"));
    }

    #[test]
    fn path_suffix_is_lowercase_with_dot() {
        assert_eq!(path_suffix(Path::new("Book.EPUB")), ".epub");
        assert_eq!(path_suffix(Path::new("README")), "");
    }
}
