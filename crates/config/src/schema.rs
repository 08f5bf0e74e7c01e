use std::path::PathBuf;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

use crate::error::ConfigError;

/// Root configuration, one section per subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrimoireConfig {
    pub assistant: AssistantConfig,
    pub rulebook: RulebookConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
}

/// Game context injected into the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub game_master_name: String,
    pub player_level: u8,
    pub campaign_setting: String,
    /// Session id used for the first conversation. A random id is generated when unset.
    pub session_id: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            game_master_name: "Alex".into(),
            player_level: 3,
            campaign_setting: "Forgotten Realms".into(),
            session_id: None,
        }
    }
}

/// Rulebook ingestion and retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulebookConfig {
    /// Path to the rulebook PDF. A missing file falls back to placeholder content.
    pub pdf_path: PathBuf,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of the same page.
    pub chunk_overlap: usize,
    /// Number of passages returned per search.
    pub top_k: usize,
    /// Number of chunks sent per embedding request while indexing.
    pub embed_batch_size: usize,
}

impl Default for RulebookConfig {
    fn default() -> Self {
        Self {
            pdf_path: PathBuf::from("Player's Handbook.pdf"),
            chunk_size: 500,
            chunk_overlap: 100,
            top_k: 4,
            embed_batch_size: 64,
        }
    }
}

/// Chat-completions provider settings (any OpenAI-compatible endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Upper bound on model calls within a single user turn.
    pub max_tool_iterations: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".into(),
            model: "llama-3.3-70b-versatile".into(),
            temperature: 0.3,
            max_tokens: 512,
            timeout_secs: 30,
            max_retries: 2,
            api_key_env: "GROQ_API_KEY".into(),
            max_tool_iterations: 5,
        }
    }
}

/// Which embedding backend builds the rulebook index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Offline feature-hashing embedder; needs no network or model files.
    #[default]
    Hashing,
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Openai,
    /// Local sentence-transformer model (requires the `local-embeddings` feature).
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key_env: String,
    /// Per-request timeout for the HTTP provider.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: "https://api.openai.com".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl GrimoireConfig {
    /// Reject settings that would make a component misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rb = &self.rulebook;
        if rb.chunk_size == 0 {
            return Err(ConfigError::Invalid("rulebook.chunk_size must be > 0".into()));
        }
        if rb.chunk_overlap >= rb.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "rulebook.chunk_overlap ({}) must be smaller than chunk_size ({})",
                rb.chunk_overlap, rb.chunk_size
            )));
        }
        if rb.top_k == 0 {
            return Err(ConfigError::Invalid("rulebook.top_k must be > 0".into()));
        }
        if rb.embed_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "rulebook.embed_batch_size must be > 0".into(),
            ));
        }
        if self.llm.max_tool_iterations == 0 {
            return Err(ConfigError::Invalid(
                "llm.max_tool_iterations must be > 0".into(),
            ));
        }
        if !(1..=20).contains(&self.assistant.player_level) {
            return Err(ConfigError::Invalid(format!(
                "assistant.player_level must be between 1 and 20, got {}",
                self.assistant.player_level
            )));
        }
        if self.llm.timeout_secs == 0 || self.embeddings.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm.timeout_secs and embeddings.timeout_secs must be > 0".into(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model is required".into()));
        }
        Ok(())
    }
}

/// Look up a secret through `lookup` and wrap it so it is never logged.
///
/// Blank values are treated as unset.
pub fn resolve_secret<F>(var: &str, lookup: F) -> Option<Secret<String>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}

impl LlmConfig {
    /// Read the chat API key from the process environment.
    pub fn api_key(&self) -> Option<Secret<String>> {
        resolve_secret(&self.api_key_env, |k| std::env::var(k).ok())
    }
}

impl EmbeddingsConfig {
    /// Read the embeddings API key from the process environment.
    pub fn api_key(&self) -> Option<Secret<String>> {
        resolve_secret(&self.api_key_env, |k| std::env::var(k).ok())
    }
}
