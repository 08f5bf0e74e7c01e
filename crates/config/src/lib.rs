//! Configuration for the grimoire rules assistant.
//!
//! Settings are read from a TOML file (see [`loader::discover_and_load`]) and
//! validated before any component is constructed. Secrets never live in the
//! config structs: each provider section names the environment variable that
//! holds its key, and [`schema::resolve_secret`] wraps the value on read.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::ConfigError,
    loader::{CONFIG_FILE_NAME, discover_and_load, load_from_path},
    schema::{
        AssistantConfig, EmbeddingProviderKind, EmbeddingsConfig, GrimoireConfig, LlmConfig,
        RulebookConfig,
    },
};
