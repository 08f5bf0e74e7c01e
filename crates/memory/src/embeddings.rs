use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    grimoire_agents::providers::RetryPolicy,
    grimoire_config::{EmbeddingProviderKind, EmbeddingsConfig},
    tracing::info,
};

use crate::{embeddings_hashing::HashingEmbeddingProvider, embeddings_openai::OpenAiEmbeddingProvider};

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed several texts, one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Stable identifier of provider + model, used in logs.
    fn provider_key(&self) -> &str {
        self.model_name()
    }
}

/// Scale `v` to unit length in place. Zero and non-finite vectors are zeroed.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    } else {
        v.iter_mut().for_each(|x| *x = 0.0);
    }
}

/// Inner product; equals cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Build the embedder selected in config.
pub fn embedder_from_config(cfg: &EmbeddingsConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match cfg.provider {
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbeddingProvider::default()),
        EmbeddingProviderKind::Openai => {
            let Some(api_key) = cfg.api_key() else {
                anyhow::bail!(
                    "embeddings provider 'openai' needs an API key in ${}",
                    cfg.api_key_env
                );
            };
            Arc::new(
                OpenAiEmbeddingProvider::new(api_key)
                    .with_base_url(cfg.base_url.clone())
                    .with_model(cfg.model.clone(), cfg.dimensions)
                    .with_timeout(Duration::from_secs(cfg.timeout_secs))?
                    .with_retry(RetryPolicy {
                        max_retries: cfg.max_retries,
                        ..RetryPolicy::default()
                    }),
            )
        },
        EmbeddingProviderKind::Local => local_provider()?,
    };
    info!(
        provider = provider.provider_key(),
        model = provider.model_name(),
        dims = provider.dimensions(),
        "embedding provider ready"
    );
    Ok(provider)
}

#[cfg(feature = "local-embeddings")]
fn local_provider() -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(
        crate::embeddings_local::LocalEmbeddingProvider::new()?,
    ))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_provider() -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    anyhow::bail!("local embeddings require building with the `local-embeddings` feature")
}
