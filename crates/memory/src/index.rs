//! Immutable in-memory vector index over rulebook chunks.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    chunker::Chunk,
    embeddings::{EmbeddingProvider, dot, normalize},
};

/// A chunk with its unit-length embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

pub struct VectorIndex {
    records: Vec<EmbeddingRecord>,
    embedder: Arc<dyn EmbeddingProvider>,
    dims: usize,
}

impl VectorIndex {
    /// Embed `chunks` in batches of `batch_size` and build the index.
    ///
    /// Fails when the embedder returns the wrong number of vectors for a batch
    /// or vectors of differing length.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> anyhow::Result<Self> {
        let batch_size = batch_size.max(1);
        let mut records = Vec::with_capacity(chunks.len());
        let mut dims: Option<usize> = None;

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }
            for (chunk, mut vector) in batch.iter().zip(vectors) {
                let expected = *dims.get_or_insert(vector.len());
                if vector.len() != expected {
                    anyhow::bail!(
                        "embedding dimension mismatch: expected {expected}, got {}",
                        vector.len()
                    );
                }
                normalize(&mut vector);
                records.push(EmbeddingRecord {
                    chunk: chunk.clone(),
                    vector,
                });
            }
            debug!(batch = batch_no, size = batch.len(), "embedded chunk batch");
        }

        let dims = dims.unwrap_or_else(|| embedder.dimensions());
        info!(
            chunks = records.len(),
            dims,
            model = embedder.model_name(),
            "vector index built"
        );
        Ok(Self {
            records,
            embedder,
            dims,
        })
    }

    /// The `k` records most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order.
    pub async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        let mut q = self.embedder.embed(query).await?;
        if q.len() != self.dims {
            anyhow::bail!(
                "query embedding has {} dimensions, index has {}",
                q.len(),
                self.dims
            );
        }
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, dot(&q, &r.vector)))
            .collect();
        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: self.records[i].chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }
}
