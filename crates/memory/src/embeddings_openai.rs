/// OpenAI-compatible embeddings provider using the `/v1/embeddings` endpoint.
use std::time::Duration;

use {
    async_trait::async_trait,
    grimoire_agents::providers::{
        RetryPolicy, http_client, openai_compat::{endpoint_url, normalize_base_url},
        post_json_with_retry,
    },
    secrecy::Secret,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::embeddings::EmbeddingProvider;

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
    provider_key: String,
    retry: RetryPolicy,
}

fn compute_provider_key(base_url: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"openai:");
    hasher.update(base_url.as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: Secret<String>) -> Self {
        let base_url = normalize_base_url("https://api.openai.com");
        let model = "text-embedding-3-small".to_string();
        let provider_key = compute_provider_key(&base_url, &model);
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            dims: 1536,
            provider_key,
            retry: RetryPolicy::default(),
        }
    }

    /// Give up on a request after `timeout`. Rebuilds the HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> anyhow::Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self.provider_key = compute_provider_key(&self.base_url, &self.model);
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = normalize_base_url(&url);
        self.provider_key = compute_provider_key(&self.base_url, &self.model);
        self
    }

    fn endpoint(&self) -> String {
        endpoint_url(&self.base_url, "embeddings")
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let body =
            post_json_with_retry(&self.client, &self.endpoint(), &self.api_key, &req, self.retry)
                .await?;
        let mut resp: EmbeddingResponse = serde_json::from_value(body)?;

        if resp.data.len() != texts.len() {
            anyhow::bail!(
                "embedding response has {} vectors for {} inputs",
                resp.data.len(),
                texts.len()
            );
        }
        // Servers may return items out of order; `index` restores input order.
        resp.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        debug!(model = %self.model, count = texts.len(), "embedded batch");
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        axum::{Json, Router, routing::post},
        http::StatusCode,
        serde_json::{Value, json},
    };

    use super::*;

    fn provider(base: &str) -> OpenAiEmbeddingProvider {
        OpenAiEmbeddingProvider::new(Secret::new("sk-test".into())).with_base_url(base.into())
    }

    #[test]
    fn endpoint_from_host_base_uses_v1_embeddings() {
        assert_eq!(
            provider("https://api.openai.com").endpoint(),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_from_v1_base_appends_embeddings_once() {
        assert_eq!(
            provider("http://localhost:8080/v1/").endpoint(),
            "http://localhost:8080/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_preserves_explicit_embeddings_url() {
        assert_eq!(
            provider("https://api.example.com/v1/embeddings").endpoint(),
            "https://api.example.com/v1/embeddings"
        );
    }

    #[test]
    fn provider_key_tracks_base_url_and_model() {
        let a = provider("https://api.openai.com");
        let b = provider("https://api.openai.com").with_model("text-embedding-3-large".into(), 3072);
        let c = provider("http://localhost:8080");
        assert_eq!(a.provider_key().len(), 16);
        assert_ne!(a.provider_key(), b.provider_key());
        assert_ne!(a.provider_key(), c.provider_key());
        assert_eq!(b.dimensions(), 3072);
    }

    #[tokio::test]
    async fn empty_batch_skips_the_request() {
        // Unroutable base: any request would fail.
        let p = provider("http://127.0.0.1:9");
        assert!(p.embed_batch(&[]).await.unwrap().is_empty());
    }

    /// Serve `router` on an ephemeral port and return its `/v1` base URL.
    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn stalled_endpoint_times_out() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let p = provider(&format!("http://{addr}/v1"))
            .with_timeout(Duration::from_millis(200))
            .unwrap()
            .with_retry(fast_retry(1));
        let result = tokio::time::timeout(Duration::from_secs(10), p.embed("goliath"))
            .await
            .expect("request should time out on its own");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("request failed"), "got: {err:#}");
    }

    #[tokio::test]
    async fn server_errors_are_retried_and_order_restored() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = Arc::clone(&hits);
        let router = Router::new().route(
            "/v1/embeddings",
            post(move |Json(body): Json<Value>| {
                let hits = Arc::clone(&hits_in_handler);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        return (StatusCode::BAD_GATEWAY, Json(json!({"error": "warming up"})));
                    }
                    assert_eq!(body["model"], "text-embedding-3-small");
                    (
                        StatusCode::OK,
                        Json(json!({"data": [
                            {"index": 1, "embedding": [0.0, 1.0]},
                            {"index": 0, "embedding": [1.0, 0.0]}
                        ]})),
                    )
                }
            }),
        );
        let base = spawn_server(router).await;

        let p = provider(&base).with_retry(fast_retry(2));
        let vectors = p
            .embed_batch(&["goliath".to_string(), "fireball".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_response_is_an_error() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async { Json(json!({"data": [{"index": 0, "embedding": [1.0]}]})) }),
        );
        let base = spawn_server(router).await;

        let err = provider(&base)
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 inputs"));
    }
}
