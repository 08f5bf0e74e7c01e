//! Session facade over the agent loop and the rulebook index.

use std::sync::Arc;

use {
    grimoire_agents::{
        AgentRunError, ChatMessage, LlmProvider, RunnerEvent, ToolRegistry, providers,
        run_agent_loop,
    },
    grimoire_config::{AssistantConfig, GrimoireConfig},
    grimoire_memory::{MemoryConfig, RulebookManager, RulebookStatus, RulesSearchTool, embedder_from_config},
    grimoire_sessions::{SessionEvent, SessionEventBus, SessionStore, SharedRulesLog, new_session_id},
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
};

use crate::{
    heuristics::extract_possible_rules,
    prompt::{PromptContext, build_system_prompt},
};

pub const GREETING: &str =
    "Welcome to D&D 5e Assistant! How can I help you with your adventure today?";

/// Returned when the model finishes a turn without any text.
pub const FALLBACK_RESPONSE: &str = "Sorry, I couldn't generate a response.";

type EventCallback<'a> = Option<&'a (dyn Fn(RunnerEvent) + Send + Sync)>;

/// One conversation with the rules assistant.
///
/// Owns the session's history (through the session store) and its
/// referenced-rules log, which it shares with the `search_rules` tool.
pub struct RulesAssistant {
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    rulebook: Arc<RulebookManager>,
    rules_log: SharedRulesLog,
    sessions: SessionStore,
    events: SessionEventBus,
    session_id: String,
    system_prompt: String,
    max_iterations: usize,
}

impl RulesAssistant {
    /// Build everything from configuration: chat provider, embedder, and the
    /// rulebook index. This is the slow start-up step.
    pub async fn new(config: &GrimoireConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let provider = providers::from_config(&config.llm)?;
        let embedder = embedder_from_config(&config.embeddings)?;
        let rulebook = RulebookManager::build(MemoryConfig::from(&config.rulebook), embedder).await?;
        Ok(Self::with_components(
            Arc::new(provider),
            Arc::new(rulebook),
            &config.assistant,
            config.llm.max_tool_iterations,
        ))
    }

    /// Assemble an assistant from ready-made parts.
    pub fn with_components(
        provider: Arc<dyn LlmProvider>,
        rulebook: Arc<RulebookManager>,
        assistant: &AssistantConfig,
        max_iterations: usize,
    ) -> Self {
        let rules_log = SharedRulesLog::new();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RulesSearchTool::new(
            Arc::clone(&rulebook),
            rules_log.clone(),
        )));

        let session_id = assistant.session_id.clone().unwrap_or_else(new_session_id);
        let events = SessionEventBus::new();
        events.publish(SessionEvent::Created {
            session_id: session_id.clone(),
        });
        info!(
            session_id = %session_id,
            provider = provider.name(),
            model = provider.id(),
            "rules assistant ready"
        );

        Self {
            provider,
            tools,
            rulebook,
            rules_log,
            sessions: SessionStore::new(),
            events,
            session_id,
            system_prompt: build_system_prompt(&PromptContext::from(assistant)),
            max_iterations,
        }
    }

    /// Answer one user message. Never fails: errors come back as
    /// `"Error: ..."` text.
    pub async fn send_message(&mut self, text: &str) -> String {
        self.try_send_message(text, None)
            .await
            .unwrap_or_else(|e| format!("Error: {e}"))
    }

    /// Answer one user message, reporting agent progress through `on_event`.
    ///
    /// The query is logged and the user message recorded in history even when
    /// the turn fails.
    pub async fn try_send_message(
        &mut self,
        text: &str,
        on_event: EventCallback<'_>,
    ) -> Result<String, AgentRunError> {
        self.rules_log.add(format!("Query: {text}"));

        let mut history = self.history();
        let result = run_agent_loop(
            self.provider.as_ref(),
            &self.tools,
            &self.system_prompt,
            text,
            &mut history,
            self.max_iterations,
            on_event,
        )
        .await;
        self.store_history(history);

        let run = match result {
            Ok(run) => run,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "turn failed");
                self.announce_rules();
                return Err(e);
            },
        };
        debug!(
            session_id = %self.session_id,
            iterations = run.iterations,
            tool_calls = run.tool_calls_made,
            "turn complete"
        );

        let response = if run.text.trim().is_empty() {
            FALLBACK_RESPONSE.to_string()
        } else {
            run.text
        };
        for rule in extract_possible_rules(&response) {
            self.rules_log.add(rule);
        }
        self.announce_rules();
        Ok(response)
    }

    /// Copy of the referenced-rules log in first-seen order.
    pub fn get_referenced_rules(&self) -> Vec<String> {
        self.rules_log.snapshot()
    }

    pub fn clear_referenced_rules(&self) {
        self.rules_log.clear();
        self.events.publish(SessionEvent::Cleared {
            session_id: self.session_id.clone(),
        });
    }

    /// Handle to the referenced-rules log shared with the search tool.
    pub fn rules_log(&self) -> SharedRulesLog {
        self.rules_log.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Switch to a fresh, empty conversation. The referenced-rules log is kept.
    pub fn new_session(&mut self) -> &str {
        self.session_id = new_session_id();
        self.events.publish(SessionEvent::Created {
            session_id: self.session_id.clone(),
        });
        info!(session_id = %self.session_id, "new session");
        &self.session_id
    }

    /// Conversation so far, without the system prompt.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.sessions
            .read(&self.session_id)
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "skipping unreadable history entry");
                    None
                },
            })
            .collect()
    }

    pub fn status(&self) -> &RulebookStatus {
        self.rulebook.status()
    }

    pub fn greeting(&self) -> &'static str {
        GREETING
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> SessionEventBus {
        self.events.clone()
    }

    fn announce_rules(&self) {
        self.events.publish(SessionEvent::RulesUpdated {
            session_id: self.session_id.clone(),
            count: self.rules_log.len(),
        });
    }

    fn store_history(&mut self, history: Vec<ChatMessage>) {
        let values = encode_history(&self.session_id, &history);
        self.sessions.replace(&self.session_id, values);
    }
}

/// Serialize messages for the session store. A message that fails to encode
/// is logged and left out.
fn encode_history<T: Serialize>(session_id: &str, messages: &[T]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .enumerate()
        .filter_map(|(position, message)| match serde_json::to_value(message) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(session_id, position, error = %e, "dropping unencodable history entry");
                None
            },
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        async_trait::async_trait,
        grimoire_agents::{CompletionResponse, ToolCall},
        grimoire_memory::{Chunk, EmbeddingProvider},
        serde_json::json,
    };

    /// Replays canned completions, then answers "Done." forever.
    pub(crate) struct ScriptedProvider {
        responses: Mutex<Vec<anyhow::Result<CompletionResponse>>>,
        pub(crate) seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(mut responses: Vec<anyhow::Result<CompletionResponse>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
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
            self.seen.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(answer("Done.")))
        }
    }

    /// Keyword presence vectors.
    struct KeywordEmbedder;

    const KEYWORDS: [&str; 4] = ["goliath", "fireball", "grapple", "elf"];

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(KEYWORDS
                .iter()
                .map(|kw| if lower.contains(kw) { 1.0 } else { 0.05 })
                .collect())
        }

        fn model_name(&self) -> &str {
            "keyword-mock"
        }

        fn dimensions(&self) -> usize {
            KEYWORDS.len()
        }
    }

    pub(crate) fn answer(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub(crate) fn search(id: &str, query: &str) -> CompletionResponse {
        CompletionResponse {
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: "search_rules".into(),
                arguments: json!({ "query": query }),
            }],
            ..Default::default()
        }
    }

    pub(crate) async fn assistant_with(provider: Arc<dyn LlmProvider>) -> RulesAssistant {
        let chunks = vec![
            Chunk {
                text: "Goliath: A race of powerful humanoids known for their strength and size."
                    .into(),
                page: Some(123),
                start_offset: 0,
            },
            Chunk {
                text: "Fireball: a bright streak flashes to a point you choose.".into(),
                page: Some(241),
                start_offset: 0,
            },
        ];
        let rulebook = RulebookManager::from_chunks(
            MemoryConfig::default(),
            chunks,
            Arc::new(KeywordEmbedder),
        )
        .await
        .unwrap();
        RulesAssistant::with_components(
            provider,
            Arc::new(rulebook),
            &AssistantConfig::default(),
            5,
        )
    }

    #[tokio::test]
    async fn goliath_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(search("call_1", "What is a Goliath?")),
            Ok(answer("A Goliath is a towering race with great Strength and size.")),
        ]));
        let mut assistant = assistant_with(provider.clone()).await;

        let reply = assistant.send_message("What is a Goliath?").await;
        assert_eq!(reply, "A Goliath is a towering race with great Strength and size.");

        let rules = assistant.get_referenced_rules();
        assert_eq!(rules[0], "Query: What is a Goliath?");
        assert_eq!(rules[1], "Search: What is a Goliath?");
        assert!(rules.contains(&"Found: Goliath: A race".to_string()));
        assert!(rules.contains(&"Possible: Goliath".to_string()));
        assert!(rules.contains(&"Possible: Strength".to_string()));

        // The second model call saw the tool observation with its page.
        let seen = provider.seen.lock().unwrap();
        let observation = seen[1]
            .iter()
            .find_map(|m| match m {
                ChatMessage::Tool { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert!(observation.starts_with("Source: Page 123\nGoliath"));

        // user, assistant tool call, tool observation, final answer
        assert_eq!(assistant.history().len(), 4);
    }

    #[tokio::test]
    async fn history_carries_into_the_next_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(answer("Hello, adventurer.")),
            Ok(answer("Still here.")),
        ]));
        let mut assistant = assistant_with(provider.clone()).await;
        assistant.send_message("Hi").await;
        assistant.send_message("Are you there?").await;

        let seen = provider.seen.lock().unwrap();
        // system + user + assistant + user
        assert_eq!(seen[1].len(), 4);
        assert!(matches!(&seen[1][0], ChatMessage::System { content } if content.contains("Game Master: Alex")));
        assert_eq!(seen[1][3].text(), Some("Are you there?"));
    }

    #[tokio::test]
    async fn failing_model_becomes_error_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(anyhow::anyhow!(
            "rate limited"
        ))]));
        let mut assistant = assistant_with(provider).await;

        let reply = assistant.send_message("Can I grapple a dragon?").await;
        assert!(reply.starts_with("Error: "), "got {reply}");
        assert!(reply.contains("rate limited"));
        assert_eq!(assistant.get_referenced_rules(), vec!["Query: Can I grapple a dragon?"]);
        // The user message stays, no assistant reply is recorded.
        assert_eq!(assistant.history(), vec![ChatMessage::user("Can I grapple a dragon?")]);
    }

    #[tokio::test]
    async fn empty_answer_uses_fallback() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(CompletionResponse::default())]));
        let mut assistant = assistant_with(provider).await;
        assert_eq!(assistant.send_message("Hmm").await, FALLBACK_RESPONSE);
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_the_bound() {
        let script = (0..10)
            .map(|i| Ok(search(&format!("call_{i}"), &format!("fireball {i}"))))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(script));
        let mut assistant = assistant_with(provider.clone()).await;

        let reply = assistant.send_message("Tell me everything").await;
        assert!(reply.starts_with("Error: "), "got {reply}");
        assert_eq!(provider.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn new_session_starts_empty_and_keeps_rules() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(answer("Sure."))]));
        let mut assistant = assistant_with(provider.clone()).await;
        assistant.send_message("Hello").await;
        let first = assistant.session_id().to_string();

        let second = assistant.new_session().to_string();
        assert_ne!(first, second);
        assert!(assistant.history().is_empty());
        assert_eq!(assistant.get_referenced_rules(), vec!["Query: Hello"]);
    }

    #[tokio::test]
    async fn clearing_rules_notifies_subscribers() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut assistant = assistant_with(provider).await;
        let mut rx = assistant.subscribe();

        assistant.send_message("Hi").await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::RulesUpdated { count: 1, .. }
        ));

        assistant.clear_referenced_rules();
        assert!(assistant.get_referenced_rules().is_empty());
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Cleared { .. }));
    }

    #[tokio::test]
    async fn status_and_greeting() {
        let assistant = assistant_with(Arc::new(ScriptedProvider::new(vec![]))).await;
        assert_eq!(assistant.status().total_chunks, 2);
        assert_eq!(assistant.status().embedding_model, "keyword-mock");
        assert!(assistant.greeting().starts_with("Welcome to D&D 5e Assistant!"));
    }

    #[tokio::test]
    async fn configured_session_id_is_used() {
        let rulebook = RulebookManager::from_chunks(
            MemoryConfig::default(),
            vec![Chunk {
                text: "Elf".into(),
                page: Some(1),
                start_offset: 0,
            }],
            Arc::new(KeywordEmbedder),
        )
        .await
        .unwrap();
        let cfg = AssistantConfig {
            session_id: Some("table-one".into()),
            ..Default::default()
        };
        let assistant = RulesAssistant::with_components(
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(rulebook),
            &cfg,
            5,
        );
        assert_eq!(assistant.session_id(), "table-one");
    }

    #[tokio::test]
    async fn missing_api_key_fails_initialization() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = GrimoireConfig::default();
        config.llm.api_key_env = "GRIMOIRE_TEST_UNSET_LLM_KEY".into();
        config.rulebook.pdf_path = tmp.path().join("none.pdf");
        let err = RulesAssistant::new(&config).await.err().unwrap();
        assert!(err.to_string().contains("GRIMOIRE_TEST_UNSET_LLM_KEY"));
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot encode"))
        }
    }

    #[derive(Serialize)]
    #[serde(untagged)]
    enum Entry {
        Message(ChatMessage),
        Broken(Unencodable),
    }

    #[test]
    fn unencodable_history_entries_are_skipped() {
        let entries = [
            Entry::Message(ChatMessage::user("What is a Goliath?")),
            Entry::Broken(Unencodable),
            Entry::Message(ChatMessage::tool("call_1", "Source: Page 123")),
        ];
        let values = encode_history("s1", &entries);
        assert_eq!(values.len(), 2);
        let decoded: ChatMessage = serde_json::from_value(values[1].clone()).unwrap();
        assert_eq!(decoded, ChatMessage::tool("call_1", "Source: Page 123"));
    }
}
