//! Non-streaming chat provider for any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI, Groq, vLLM, Ollama's compatibility layer, ...).

use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
};

use crate::{
    model::{ChatMessage, CompletionResponse, LlmProvider},
    providers::openai_compat::{
        endpoint_url, normalize_base_url, parse_tool_calls, parse_usage, to_openai_messages,
        to_openai_tools,
    },
};

/// Longest error body kept in [`ProviderError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not set (expected environment variable {0})")]
    MissingApiKey(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Decode(String),
}

/// How often and how patiently a failed request is retried. Transport
/// errors, 429 and 5xx are retried; other statuses fail at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Build a client whose requests give up after `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ProviderError::Client)
}

/// POST `body` as JSON with bearer auth and decode the JSON reply, retrying
/// per `retry`. Shared by the chat and embeddings clients.
pub async fn post_json_with_retry<B: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &Secret<String>,
    body: &B,
    retry: RetryPolicy,
) -> Result<serde_json::Value, ProviderError> {
    let mut attempt: u32 = 0;
    loop {
        let error = match client
            .post(url)
            .bearer_auth(api_key.expose_secret())
            .json(body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                return resp
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| ProviderError::Decode(e.to_string()));
            },
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                let error = ProviderError::Status {
                    status: status.as_u16(),
                    body: truncate(&text, MAX_ERROR_BODY),
                };
                if !is_retryable_status(status) {
                    return Err(error);
                }
                error
            },
            Err(e) => ProviderError::Transport(e),
        };

        if attempt >= retry.max_retries {
            return Err(error);
        }
        let delay = retry.delay(attempt);
        attempt += 1;
        warn!(
            url,
            attempt,
            max_retries = retry.max_retries,
            error = %error,
            "request failed, retrying in {delay:?}"
        );
        tokio::time::sleep(delay).await;
    }
}

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: Secret<String>, base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: normalize_base_url(base_url),
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: 512,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Base delay before the first retry; doubles on each further attempt.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Apply a whole-request timeout. Rebuilds the HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": to_openai_messages(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(to_openai_tools(tools));
            body["tool_choice"] = serde_json::json!("auto");
        }
        body
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> anyhow::Result<CompletionResponse> {
        let body = self.request_body(messages, tools);
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat completion"
        );
        let url = endpoint_url(&self.base_url, "chat/completions");
        let resp =
            post_json_with_retry(&self.client, &url, &self.api_key, &body, self.retry).await?;

        let message = resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| ProviderError::Decode("response has no choices[0].message".into()))?;

        let text = message["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let tool_calls = parse_tool_calls(message);
        let usage = parse_usage(&resp);
        debug!(
            model = %self.model,
            tool_calls = tool_calls.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "chat completion received"
        );

        Ok(CompletionResponse {
            text,
            tool_calls,
            usage,
        })
    }
}
