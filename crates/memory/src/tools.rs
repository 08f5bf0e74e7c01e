//! `search_rules` agent tool.

use std::sync::Arc;

use {
    async_trait::async_trait,
    grimoire_agents::AgentTool,
    grimoire_sessions::SharedRulesLog,
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use crate::{chunker::Chunk, index::SearchHit, manager::RulebookManager};

pub const TOOL_NAME: &str = "search_rules";
pub const TOOL_DESCRIPTION: &str = "Search the D&D 5e rules for specific information.";
pub const NO_RESULTS: &str = "No matching rules found in the rulebooks.";

/// Hits containing one of these words are recorded as "Found" entries.
const NOTABLE_TERMS: [&str; 6] = ["race", "class", "spell", "item", "monster", "rule"];
/// Only the first hits are considered for "Found" entries.
const NOTABLE_HITS: usize = 2;

/// Searches the rulebook index and records what was looked up in the
/// session's referenced-rules log.
pub struct RulesSearchTool {
    manager: Arc<RulebookManager>,
    rules_log: SharedRulesLog,
    top_k: usize,
}

/// One lookup and the passages it returned. Lives for a single call.
struct ToolInvocation<'a> {
    query: &'a str,
    results: Vec<Chunk>,
}

impl RulesSearchTool {
    pub fn new(manager: Arc<RulebookManager>, rules_log: SharedRulesLog) -> Self {
        let top_k = manager.top_k();
        Self {
            manager,
            rules_log,
            top_k,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Run a lookup and render the observation for the model. Never fails:
    /// errors are returned as text.
    pub async fn search_rules(&self, query: &str) -> String {
        let hits = match self.manager.search(query, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, error = %e, "rules search failed");
                return format!("Error searching rules: {e:#}");
            },
        };
        if hits.is_empty() {
            return NO_RESULTS.to_string();
        }

        let invocation = ToolInvocation {
            query,
            results: hits.into_iter().map(|SearchHit { chunk, .. }| chunk).collect(),
        };
        self.record(&invocation);
        debug!(query, hits = invocation.results.len(), "rules search done");
        render(&invocation.results)
    }

    fn record(&self, invocation: &ToolInvocation<'_>) {
        self.rules_log.add(format!("Search: {}", invocation.query));
        for chunk in invocation.results.iter().take(NOTABLE_HITS) {
            let lower = chunk.text.to_lowercase();
            if NOTABLE_TERMS.iter().any(|t| lower.contains(t)) {
                self.rules_log.add(format!("Found: {}", leading_words(&chunk.text)));
            }
        }
    }
}

/// First three words, trimmed of surrounding punctuation.
fn leading_words(text: &str) -> String {
    text.split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c| matches!(c, '.' | ',' | ':' | ';'))
        .to_string()
}

fn render(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| {
            let page = c.page.map_or_else(|| "N/A".to_string(), |p| p.to_string());
            format!("Source: Page {page}\n{}", c.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl AgentTool for RulesSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        TOOL_DESCRIPTION
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in the rules"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<String> {
        match params.get("query").and_then(Value::as_str) {
            Some(query) if !query.trim().is_empty() => Ok(self.search_rules(query).await),
            _ => Ok("Error searching rules: missing 'query' argument".to_string()),
        }
    }
}
