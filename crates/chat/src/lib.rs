//! The rules assistant: system prompt, per-session chat facade, the
//! response heuristic, and a single-slot background worker for front ends.

pub mod assistant;
pub mod heuristics;
pub mod prompt;
pub mod worker;

pub use {
    assistant::{FALLBACK_RESPONSE, GREETING, RulesAssistant},
    heuristics::extract_possible_rules,
    prompt::{PromptContext, build_system_prompt},
    worker::{AssistantWorker, WorkerError, WorkerEvent},
};
