use std::path::PathBuf;

use grimoire_config::RulebookConfig;

/// Configuration for the rulebook index.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Rulebook PDF. Missing files fall back to placeholder content.
    pub pdf_path: PathBuf,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks of a page, in characters.
    pub chunk_overlap: usize,
    /// Passages returned per search.
    pub top_k: usize,
    /// Chunks per embedding request during indexing.
    pub embed_batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::from(&RulebookConfig::default())
    }
}

impl From<&RulebookConfig> for MemoryConfig {
    fn from(cfg: &RulebookConfig) -> Self {
        Self {
            pdf_path: cfg.pdf_path.clone(),
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
            top_k: cfg.top_k,
            embed_batch_size: cfg.embed_batch_size,
        }
    }
}
