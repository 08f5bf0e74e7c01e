//! The tool-calling agent loop.
//!
//! One call to [`run_agent_loop`] is one user turn: the model is re-invoked
//! after every batch of tool calls until it answers without requesting a tool,
//! or until the iteration bound is reached.

use tracing::{debug, info, warn};

use crate::{
    model::{ChatMessage, LlmProvider, ToolCall, Usage},
    tool_registry::ToolRegistry,
};

/// Model calls allowed per turn unless the caller says otherwise.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Progress notifications emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// About to call the model (1-based).
    Thinking { iteration: usize },
    ToolCallStart {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolCallEnd {
        id: String,
        name: String,
        success: bool,
    },
    Done { iterations: usize, usage: Usage },
}

#[derive(Debug, thiserror::Error)]
pub enum AgentRunError {
    #[error("model call failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("no final answer after {max} model calls")]
    MaxIterations { max: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunResult {
    /// Final assistant text; empty if the model returned no content.
    pub text: String,
    pub iterations: usize,
    pub tool_calls_made: usize,
    pub usage: Usage,
}

/// Run one user turn.
///
/// `history` holds the conversation without the system prompt. The user
/// message, every assistant tool-call message, every tool observation, and the
/// final assistant message are appended to it as the turn progresses, so a
/// failed turn leaves whatever was recorded before the failure.
pub async fn run_agent_loop(
    provider: &dyn LlmProvider,
    tools: &ToolRegistry,
    system_prompt: &str,
    user_message: &str,
    history: &mut Vec<ChatMessage>,
    max_iterations: usize,
    on_event: Option<&(dyn Fn(RunnerEvent) + Send + Sync)>,
) -> Result<AgentRunResult, AgentRunError> {
    let emit = |event: RunnerEvent| {
        if let Some(cb) = on_event {
            cb(event);
        }
    };

    history.push(ChatMessage::user(user_message));
    let schemas = tools.list_schemas();
    let mut usage = Usage::default();
    let mut tool_calls_made = 0usize;

    for iteration in 1..=max_iterations {
        emit(RunnerEvent::Thinking { iteration });

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().cloned());

        let response = provider
            .complete(&messages, &schemas)
            .await
            .map_err(AgentRunError::Provider)?;
        usage.accumulate(response.usage);

        if response.tool_calls.is_empty() {
            let text = response.text.unwrap_or_default();
            history.push(ChatMessage::assistant(text.clone()));
            info!(
                model = provider.id(),
                iterations = iteration,
                tool_calls = tool_calls_made,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "agent turn complete"
            );
            emit(RunnerEvent::Done {
                iterations: iteration,
                usage,
            });
            return Ok(AgentRunResult {
                text,
                iterations: iteration,
                tool_calls_made,
                usage,
            });
        }

        history.push(ChatMessage::Assistant {
            content: response.text,
            tool_calls: response.tool_calls.clone(),
        });

        for call in response.tool_calls {
            emit(RunnerEvent::ToolCallStart {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let (observation, success) = execute_tool(tools, &call).await;
            emit(RunnerEvent::ToolCallEnd {
                id: call.id.clone(),
                name: call.name.clone(),
                success,
            });
            history.push(ChatMessage::tool(call.id, observation));
            tool_calls_made += 1;
        }
    }

    warn!(
        model = provider.id(),
        max_iterations, tool_calls = tool_calls_made, "agent turn hit iteration limit"
    );
    Err(AgentRunError::MaxIterations {
        max: max_iterations,
    })
}

/// Execute one tool call, turning every failure into an observation string.
async fn execute_tool(tools: &ToolRegistry, call: &ToolCall) -> (String, bool) {
    let Some(tool) = tools.get(&call.name) else {
        warn!(tool = %call.name, "model requested unknown tool");
        return (format!("Error: unknown tool {}", call.name), false);
    };
    debug!(tool = %call.name, arguments = %call.arguments, "executing tool");
    match tool.execute(call.arguments.clone()).await {
        Ok(output) => (output, true),
        Err(e) => {
            warn!(tool = %call.name, error = %e, "tool execution failed");
            (format!("Error: {e}"), false)
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {async_trait::async_trait, serde_json::json};

    use {
        super::*,
        crate::{model::CompletionResponse, tool_registry::AgentTool},
    };

    /// Replays scripted responses and records the messages it was sent.
    struct ScriptedProvider {
        responses: Mutex<Vec<anyhow::Result<CompletionResponse>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<anyhow::Result<CompletionResponse>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn id(&self) -> &str {
            "scripted-model"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[serde_json::Value],
        ) -> anyhow::Result<CompletionResponse> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(tool_request("call_x", "loop")))
        }
    }

    /// Always requests the search tool, never answers.
    struct LoopingProvider;

    #[async_trait]
    impl LlmProvider for LoopingProvider {
        fn name(&self) -> &str {
            "looping"
        }

        fn id(&self) -> &str {
            "looping-model"
        }

        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[serde_json::Value],
        ) -> anyhow::Result<CompletionResponse> {
            Ok(tool_request("call_again", "more rules"))
        }
    }

    struct RecordingTool {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentTool for RecordingTool {
        fn name(&self) -> &str {
            "search_rules"
        }

        fn description(&self) -> &str {
            "test search"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"query": {"type": "string"}}})
        }

        async fn execute(&self, params: serde_json::Value) -> anyhow::Result<String> {
            let query = params["query"].as_str().unwrap_or_default().to_string();
            if query == "explode" {
                anyhow::bail!("index unavailable");
            }
            self.queries.lock().unwrap().push(query.clone());
            Ok(format!("Source: Page 1\nresult for {query}"))
        }
    }

    fn tool_request(id: &str, query: &str) -> CompletionResponse {
        CompletionResponse {
            text: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: "search_rules".into(),
                arguments: json!({"query": query}),
            }],
            usage: Usage {
                input_tokens: 10,
                output_tokens: 2,
            },
        }
    }

    fn answer(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: Some(text.into()),
            tool_calls: vec![],
            usage: Usage {
                input_tokens: 20,
                output_tokens: 5,
            },
        }
    }

    fn registry() -> (ToolRegistry, Arc<RecordingTool>) {
        let tool = Arc::new(RecordingTool {
            queries: Mutex::new(Vec::new()),
        });
        let mut reg = ToolRegistry::new();
        reg.register(tool.clone());
        (reg, tool)
    }

    #[tokio::test]
    async fn answer_without_tools_takes_one_iteration() {
        let provider = ScriptedProvider::new(vec![Ok(answer("Hello, adventurer!"))]);
        let (tools, _) = registry();
        let mut history = Vec::new();

        let result = run_agent_loop(&provider, &tools, "sys", "hi", &mut history, 5, None)
            .await
            .unwrap();

        assert_eq!(result.text, "Hello, adventurer!");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.tool_calls_made, 0);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("hi"));
        assert_eq!(history[1], ChatMessage::assistant("Hello, adventurer!"));
    }

    #[tokio::test]
    async fn tool_observation_is_fed_back_before_final_answer() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_request("call_1", "goliath")),
            Ok(answer("Goliaths are strong.")),
        ]);
        let (tools, tool) = registry();
        let mut history = Vec::new();

        let result = run_agent_loop(
            &provider,
            &tools,
            "sys",
            "What is a Goliath?",
            &mut history,
            5,
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.text, "Goliaths are strong.");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.tool_calls_made, 1);
        assert_eq!(result.usage.input_tokens, 30);
        assert_eq!(*tool.queries.lock().unwrap(), vec!["goliath"]);

        // user, assistant(tool call), tool, assistant(final)
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].role(), "assistant");
        assert_eq!(
            history[2],
            ChatMessage::tool("call_1", "Source: Page 1\nresult for goliath")
        );

        // Second model call saw the system prompt, the tool call and the observation.
        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[1][0], ChatMessage::system("sys"));
        assert_eq!(calls[1].len(), 4);
        assert_eq!(calls[1][3].role(), "tool");
    }

    #[tokio::test]
    async fn repeated_tool_requests_stop_at_the_bound() {
        let (tools, tool) = registry();
        let mut history = Vec::new();

        let err = run_agent_loop(&LoopingProvider, &tools, "sys", "loop", &mut history, 3, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentRunError::MaxIterations { max: 3 }));
        assert_eq!(tool.queries.lock().unwrap().len(), 3);
        assert_eq!(history.first(), Some(&ChatMessage::user("loop")));
    }

    #[tokio::test]
    async fn default_bound_is_five_model_calls() {
        let provider = ScriptedProvider::new(vec![]);
        let (tools, _) = registry();
        let mut history = Vec::new();

        let err = run_agent_loop(
            &provider,
            &tools,
            "sys",
            "loop",
            &mut history,
            DEFAULT_MAX_ITERATIONS,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AgentRunError::MaxIterations { max: 5 }));
        assert_eq!(provider.call_count(), 5);
    }

    #[tokio::test]
    async fn tool_errors_and_unknown_tools_become_observations() {
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionResponse {
                text: None,
                tool_calls: vec![
                    ToolCall {
                        id: "a".into(),
                        name: "search_rules".into(),
                        arguments: json!({"query": "explode"}),
                    },
                    ToolCall {
                        id: "b".into(),
                        name: "cast_spell".into(),
                        arguments: json!({}),
                    },
                ],
                usage: Usage::default(),
            }),
            Ok(answer("Sorry, the rulebook is unavailable.")),
        ]);
        let (tools, _) = registry();
        let mut history = Vec::new();

        let result = run_agent_loop(&provider, &tools, "sys", "q", &mut history, 5, None)
            .await
            .unwrap();

        assert_eq!(result.tool_calls_made, 2);
        assert_eq!(
            history[2],
            ChatMessage::tool("a", "Error: index unavailable")
        );
        assert_eq!(
            history[3],
            ChatMessage::tool("b", "Error: unknown tool cast_spell")
        );
    }

    #[tokio::test]
    async fn provider_failure_keeps_user_message() {
        let provider = ScriptedProvider::new(vec![Err(anyhow::anyhow!("rate limited"))]);
        let (tools, _) = registry();
        let mut history = Vec::new();

        let err = run_agent_loop(&provider, &tools, "sys", "hi", &mut history, 5, None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("rate limited"));
        assert_eq!(history, vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn events_trace_the_turn() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_request("call_1", "grapple")),
            Ok(answer("Use Athletics.")),
        ]);
        let (tools, _) = registry();
        let mut history = Vec::new();
        let events = Mutex::new(Vec::new());
        let on_event = |e: RunnerEvent| events.lock().unwrap().push(e);

        run_agent_loop(
            &provider,
            &tools,
            "sys",
            "grapple?",
            &mut history,
            5,
            Some(&on_event),
        )
        .await
        .unwrap();

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], RunnerEvent::Thinking { iteration: 1 });
        assert!(matches!(&events[1], RunnerEvent::ToolCallStart { name, .. } if name == "search_rules"));
        assert!(matches!(&events[2], RunnerEvent::ToolCallEnd { success: true, .. }));
        assert_eq!(events[3], RunnerEvent::Thinking { iteration: 2 });
        assert!(matches!(&events[4], RunnerEvent::Done { iterations: 2, .. }));
    }
}
