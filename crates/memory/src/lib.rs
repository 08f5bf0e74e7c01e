//! Rulebook memory: PDF pages → overlapping chunks → embeddings → in-memory
//! nearest-neighbour search, plus the `search_rules` agent tool on top.

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod embeddings_hashing;
#[cfg(feature = "local-embeddings")]
pub mod embeddings_local;
pub mod embeddings_openai;
pub mod index;
pub mod loader;
pub mod manager;
pub mod tools;

pub use {
    chunker::{Chunk, chunk_pages},
    config::MemoryConfig,
    embeddings::{EmbeddingProvider, embedder_from_config},
    index::{EmbeddingRecord, SearchHit, VectorIndex},
    loader::{PageText, load_rulebook},
    manager::{RulebookManager, RulebookStatus},
    tools::RulesSearchTool,
};
