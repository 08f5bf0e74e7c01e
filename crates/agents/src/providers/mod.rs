pub mod openai;
pub mod openai_compat;

use {grimoire_config::LlmConfig, std::time::Duration};

pub use openai::{
    OpenAiCompatProvider, ProviderError, RetryPolicy, http_client, post_json_with_retry,
};

/// Build the chat provider described by `config`.
///
/// Fails with [`ProviderError::MissingApiKey`] when the configured key
/// variable is unset, so the caller can report it as an initialization error.
pub fn from_config(config: &LlmConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config
        .api_key()
        .ok_or_else(|| ProviderError::MissingApiKey(config.api_key_env.clone()))?;
    OpenAiCompatProvider::new(api_key, &config.base_url, &config.model)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
        .with_max_retries(config.max_retries)
        .with_timeout(Duration::from_secs(config.timeout_secs))
}
