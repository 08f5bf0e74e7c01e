//! LLM plumbing for the rules assistant: message model, provider trait,
//! OpenAI-compatible provider, tool registry, and the bounded tool-calling
//! agent loop.

pub mod model;
pub mod providers;
pub mod runner;
pub mod tool_registry;

pub use {
    model::{ChatMessage, CompletionResponse, LlmProvider, ToolCall, Usage},
    runner::{AgentRunError, AgentRunResult, DEFAULT_MAX_ITERATIONS, RunnerEvent, run_agent_loop},
    tool_registry::{AgentTool, ToolRegistry},
};
