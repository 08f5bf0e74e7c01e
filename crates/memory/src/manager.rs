/// Rulebook manager: orchestrates loading, chunking, embedding, and search.
use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    chunker::{Chunk, chunk_pages},
    config::MemoryConfig,
    embeddings::EmbeddingProvider,
    index::{SearchHit, VectorIndex},
    loader::{load_rulebook, placeholder_pages},
};

pub struct RulebookManager {
    config: MemoryConfig,
    index: VectorIndex,
    status: RulebookStatus,
}

/// Status info about the rulebook index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulebookStatus {
    pub total_pages: usize,
    pub total_chunks: usize,
    pub embedding_model: String,
    /// True when the index holds placeholder content instead of the rulebook.
    pub placeholder: bool,
}

impl RulebookManager {
    /// Load the configured rulebook and index it.
    ///
    /// A missing, unreadable or empty rulebook falls back to placeholder
    /// content, so the index is never empty. Only embedding failures are errors.
    pub async fn build(
        config: MemoryConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let mut pages = load_rulebook(&config.pdf_path).await;
        let mut placeholder = pages.iter().all(|p| p.page.is_none());
        let mut chunks = chunk_pages(&pages, config.chunk_size, config.chunk_overlap);

        if chunks.is_empty() {
            warn!(
                path = %config.pdf_path.display(),
                "rulebook produced no text, using placeholder content"
            );
            pages = placeholder_pages();
            placeholder = true;
            chunks = chunk_pages(&pages, config.chunk_size, config.chunk_overlap);
        }

        let total_pages = if placeholder { 0 } else { pages.len() };
        Self::index(config, chunks, embedder, total_pages, placeholder).await
    }

    /// Index pre-chunked content without touching the filesystem.
    pub async fn from_chunks(
        config: MemoryConfig,
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let mut pages: Vec<u32> = chunks.iter().filter_map(|c| c.page).collect();
        pages.sort_unstable();
        pages.dedup();
        Self::index(config, chunks, embedder, pages.len(), false).await
    }

    async fn index(
        config: MemoryConfig,
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        total_pages: usize,
        placeholder: bool,
    ) -> anyhow::Result<Self> {
        let embedding_model = embedder.model_name().to_string();
        let index = VectorIndex::build(chunks, embedder, config.embed_batch_size).await?;
        let status = RulebookStatus {
            total_pages,
            total_chunks: index.len(),
            embedding_model,
            placeholder,
        };
        info!(
            pages = status.total_pages,
            chunks = status.total_chunks,
            placeholder = status.placeholder,
            "rulebook indexed"
        );
        Ok(Self {
            config,
            index,
            status,
        })
    }

    /// Nearest passages to `query`, best first.
    pub async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>> {
        self.index.search(query, limit).await
    }

    pub fn status(&self) -> &RulebookStatus {
        &self.status
    }

    /// Configured number of passages per search.
    pub fn top_k(&self) -> usize {
        self.config.top_k
    }
}
