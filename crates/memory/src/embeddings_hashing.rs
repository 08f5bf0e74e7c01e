//! Offline embedder based on feature hashing.
//!
//! Each lowercase word and each of its boundary-padded character trigrams is
//! hashed into one of `dims` buckets. Similar wording yields similar vectors,
//! which is enough to retrieve rulebook passages without a network call or
//! model download. Quality is well below a learned model.

use async_trait::async_trait;

use crate::embeddings::{EmbeddingProvider, normalize};

pub const DEFAULT_DIMENSIONS: usize = 384;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashingEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            v[self.bucket(word.as_bytes())] += WORD_WEIGHT;

            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                v[self.bucket(gram.as_bytes())] += TRIGRAM_WEIGHT;
            }
        }
        normalize(&mut v);
        v
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        (fnv1a(bytes) % self.dims as u64) as usize
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn model_name(&self) -> &str {
        "feature-hash-v1"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        "hashing"
    }
}
