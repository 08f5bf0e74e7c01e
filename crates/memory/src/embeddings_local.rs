//! In-process embeddings with fastembed (all-MiniLM-L6-v2, 384 dims).
//! The model is downloaded on first use.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    fastembed::{EmbeddingModel, InitOptions, TextEmbedding},
    tracing::info,
};

use crate::embeddings::EmbeddingProvider;

const MODEL_NAME: &str = "all-MiniLM-L6-v2";
const DIMENSIONS: usize = 384;

pub struct LocalEmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbeddingProvider {
    pub fn new() -> anyhow::Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))?;
        info!(model = MODEL_NAME, "local embedding model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
            model.embed(texts, None)
        })
        .await?
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn provider_key(&self) -> &str {
        "local"
    }
}
