use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::errors::{AgentResult, ProviderError};
use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::prompt_template::load_prompt;
use crate::protocol::{WireMessage, WireRole};
use crate::providers::base::Provider;
use crate::routing::strip_fences;
use crate::systems::{render_tool_output, ToolRegistry};

const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

pub const DEFAULT_MAX_TURNS: NonZeroUsize = match NonZeroUsize::new(3) {
    Some(turns) => turns,
    None => unreachable!(),
};

pub const DEFAULT_PERSONA: &str = "You are a helpful assistant.";

/// Asked when the model wants more input but did not say what
pub const DEFAULT_QUESTION: &str = "Could you tell me more about what you need?";

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

#[derive(Serialize)]
struct SystemPromptContext<'a> {
    persona: &'a str,
    systems: Vec<SystemInfo>,
    structured: bool,
}

/// How a drained reply loop ended
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Text of the last assistant message, possibly empty
    pub text: String,
    /// Completion calls made
    pub turns: usize,
    /// The last allowed turn still asked for tools, which were not run
    pub exhausted: bool,
    /// Every message appended after the seed
    pub transcript: Vec<Message>,
}

/// A final answer, read as the structured status object when it is one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Completed(String),
    InputRequired(String),
    Error(String),
}

impl ReplyStatus {
    /// Accepts `{"status": "completed" | "input_required" | "error", "message": ...}`,
    /// optionally fenced. Any other text is a completed answer as written.
    pub fn parse(text: &str) -> Self {
        let structured = match serde_json::from_str::<Value>(strip_fences(text)) {
            Ok(Value::Object(object)) => object,
            _ => return ReplyStatus::Completed(text.to_string()),
        };

        let message = structured
            .get("message")
            .map(render_tool_output)
            .unwrap_or_default();
        match structured.get("status").and_then(Value::as_str) {
            Some("completed") => ReplyStatus::Completed(message),
            Some("input_required") if message.trim().is_empty() => {
                ReplyStatus::InputRequired(DEFAULT_QUESTION.to_string())
            }
            Some("input_required") => ReplyStatus::InputRequired(message),
            Some("error") => ReplyStatus::Error(message),
            _ => ReplyStatus::Completed(text.to_string()),
        }
    }
}

/// Agent integrates a foundational LLM with the tools it may call
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    persona: String,
    max_turns: NonZeroUsize,
    temperature: Option<f32>,
    structured: bool,
}

impl Agent {
    /// Create a new Agent with the specified provider and tools
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            persona: DEFAULT_PERSONA.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            temperature: None,
            structured: false,
        }
    }

    pub fn with_persona<S: Into<String>>(mut self, persona: S) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: NonZeroUsize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Ask the model to answer with a status object instead of plain text
    pub fn with_structured_replies(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    pub fn max_turns(&self) -> NonZeroUsize {
        self.max_turns
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn system_prompt(&self) -> String {
        let context = SystemPromptContext {
            persona: &self.persona,
            systems: self
                .registry
                .systems()
                .iter()
                .map(|system| {
                    SystemInfo::new(system.name(), system.description(), system.instructions())
                })
                .collect(),
            structured: self.structured,
        };

        load_prompt(SYSTEM_PROMPT, &context).unwrap_or_else(|e| {
            tracing::error!(error = %e, "could not render system prompt, using persona only");
            self.persona.clone()
        })
    }

    /// The opening transcript for a task: the system prompt, earlier
    /// exchanges in the same task, then the new request.
    pub fn seed(&self, history: &[WireMessage], task: &str) -> Vec<Message> {
        let mut messages = vec![Message::system().with_text(self.system_prompt())];
        for earlier in history {
            let message = match earlier.role {
                WireRole::User => Message::user(),
                WireRole::Agent => Message::assistant(),
            };
            messages.push(message.with_text(earlier.text()));
        }
        messages.push(Message::user().with_text(task));
        messages
    }

    /// Dispatch a single tool call through the registry
    async fn dispatch_tool_call(&self, tool_call: &AgentResult<ToolCall>) -> AgentResult<Value> {
        let call = tool_call.clone()?;
        tracing::info!(tool = %call.name, "calling tool");
        self.registry.invoke(&call.name, call.arguments).await
    }

    /// Create a stream that yields each message as it's appended to the transcript.
    /// This includes both the assistant's responses and one tool message per tool request.
    ///
    /// At most `max_turns` completions are requested. Tool requests made on the
    /// last allowed turn are not executed.
    pub fn reply(&self, messages: &[Message]) -> BoxStream<'_, Result<Message, ProviderError>> {
        let mut messages = messages.to_vec();
        let tools = self.registry.describe();
        let max_turns = self.max_turns.get();

        Box::pin(async_stream::try_stream! {
            for turn in 1..=max_turns {
                let (response, _usage) = self
                    .provider
                    .complete(&messages, &tools, self.temperature)
                    .await?;

                messages.push(response.clone());
                yield response.clone();

                // Make sure the above message is delivered before long-running tools start
                tokio::task::yield_now().await;

                let tool_requests = response.tool_requests();
                if tool_requests.is_empty() {
                    break;
                }
                if turn == max_turns {
                    tracing::warn!(
                        pending = tool_requests.len(),
                        max_turns,
                        "turn budget exhausted with tool requests pending"
                    );
                    break;
                }

                // Sequentially, in request order
                for request in tool_requests {
                    let output = match self.dispatch_tool_call(&request.tool_call).await {
                        Ok(value) => render_tool_output(&value),
                        Err(e) => {
                            tracing::warn!(id = %request.id, error = %e, "tool call failed");
                            format!("Error: {}", e)
                        }
                    };
                    let message = Message::tool().with_tool_response(request.id.clone(), output);
                    messages.push(message.clone());
                    yield message;
                }
            }
        })
    }

    /// Run the loop on `task` until the model stops asking for tools or the budget runs out
    pub async fn run(&self, task: &str) -> Result<LoopOutcome, ProviderError> {
        let seed = self.seed(&[], task);
        self.drain(self.reply(&seed)).await
    }

    pub(crate) async fn drain(
        &self,
        mut stream: BoxStream<'_, Result<Message, ProviderError>>,
    ) -> Result<LoopOutcome, ProviderError> {
        let mut outcome = LoopOutcome {
            text: String::new(),
            turns: 0,
            exhausted: false,
            transcript: Vec::new(),
        };

        while let Some(message) = stream.try_next().await? {
            if message.role == crate::models::role::Role::Assistant {
                outcome.turns += 1;
                outcome.text = message.text();
                outcome.exhausted =
                    message.has_tool_requests() && outcome.turns == self.max_turns.get();
            }
            outcome.transcript.push(message);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::models::message::MessageContent;
    use crate::models::role::Role;
    use crate::models::tool::Tool;
    use crate::providers::mock::MockProvider;
    use crate::systems::System;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Repeats a phrase back and counts how often it ran
    struct ParrotSystem {
        tools: Vec<Tool>,
        calls: AtomicUsize,
    }

    impl ParrotSystem {
        fn new() -> Self {
            Self {
                tools: vec![Tool::new(
                    "repeat",
                    "Say the phrase back",
                    json!({
                        "type": "object",
                        "properties": {"phrase": {"type": "string"}},
                        "required": ["phrase"]
                    }),
                )],
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl System for ParrotSystem {
        fn name(&self) -> &str {
            "parrot"
        }

        fn description(&self) -> &str {
            "Repeats what it is told"
        }

        fn instructions(&self) -> &str {
            "Use repeat when the user asks you to quote something."
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match tool_call.name.as_str() {
                "repeat" => Ok(tool_call.arguments["phrase"].clone()),
                _ => Err(AgentError::ToolNotFound(tool_call.name)),
            }
        }
    }

    fn agent_with(provider: &MockProvider) -> (Agent, Arc<ParrotSystem>) {
        let system = Arc::new(ParrotSystem::new());
        let mut registry = ToolRegistry::new();
        registry.register(system.clone()).unwrap();
        let agent = Agent::new(Arc::new(provider.clone()), Arc::new(registry));
        (agent, system)
    }

    async fn collect(agent: &Agent, task: &str) -> Result<Vec<Message>, ProviderError> {
        let seed = agent.seed(&[], task);
        let mut stream = agent.reply(&seed);
        let mut messages = Vec::new();
        while let Some(msg) = stream.try_next().await? {
            messages.push(msg);
        }
        Ok(messages)
    }

    fn repeat(id: &str, phrase: &str) -> Message {
        Message::assistant().with_tool_request(
            id,
            Ok(ToolCall::new("repeat", json!({"phrase": phrase}))),
        )
    }

    #[tokio::test]
    async fn test_simple_response() -> anyhow::Result<()> {
        let response = Message::assistant().with_text("Hi, what can I convert?");
        let provider = MockProvider::new(vec![response.clone()]);
        let (agent, _) = agent_with(&provider);

        let messages = collect(&agent, "hello").await?;

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], response);
        assert_eq!(provider.call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call() -> anyhow::Result<()> {
        let provider = MockProvider::new(vec![
            repeat("1", "bonjour"),
            Message::assistant().with_text("I said bonjour"),
        ]);
        let (agent, _) = agent_with(&provider);

        let messages = collect(&agent, "Say bonjour").await?;

        assert_eq!(messages.len(), 3);
        assert!(messages[0].has_tool_requests());
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(
            messages[1].content[0],
            MessageContent::tool_response("1", "bonjour")
        );
        assert_eq!(messages[2].content[0], MessageContent::text("I said bonjour"));

        // The second completion saw the full exchange after the seed
        let second = &provider.transcripts()[1];
        let roles: Vec<_> = second.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool() -> anyhow::Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("convert_currency", json!({})))),
            Message::assistant().with_text("No converter here"),
        ]);
        let (agent, system) = agent_with(&provider);

        let messages = collect(&agent, "Convert 5 USD").await?;

        assert_eq!(messages.len(), 3);
        let output = &messages[1].content[0].as_tool_response().unwrap().output;
        assert!(output.starts_with("Error:"));
        assert!(output.contains("convert_currency"));
        assert_eq!(messages[2].content[0], MessageContent::text("No converter here"));
        assert_eq!(system.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unusable_requests_still_answered() -> anyhow::Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request(
                    "1",
                    Err(AgentError::ToolNotFound("bad name".to_string())),
                )
                .with_tool_request("2", Ok(ToolCall::new("repeat", json!({})))),
            Message::assistant().with_text("ok"),
        ]);
        let (agent, _) = agent_with(&provider);

        let messages = collect(&agent, "go").await?;

        assert_eq!(messages.len(), 4);
        for tool_message in &messages[1..3] {
            let output = &tool_message.content[0].as_tool_response().unwrap().output;
            assert!(output.starts_with("Error:"), "{output}");
        }
        assert!(messages[2].content[0]
            .as_tool_response()
            .unwrap()
            .output
            .contains("Invalid parameters"));
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_tool_calls() -> anyhow::Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request(
                    "1",
                    Ok(ToolCall::new("repeat", json!({"phrase": "first"}))),
                )
                .with_tool_request(
                    "2",
                    Ok(ToolCall::new("repeat", json!({"phrase": "second"}))),
                ),
            Message::assistant().with_text("first, second"),
        ]);
        let (agent, _) = agent_with(&provider);

        let messages = collect(&agent, "Say first then second").await?;

        // One tool message per request, in request order
        assert_eq!(messages.len(), 4);
        assert_eq!(
            messages[1].content[0],
            MessageContent::tool_response("1", "first")
        );
        assert_eq!(
            messages[2].content[0],
            MessageContent::tool_response("2", "second")
        );
        assert_eq!(messages[3].content[0], MessageContent::text("first, second"));
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_exhausted_skips_pending_tools() -> anyhow::Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("Let me check").with_tool_request(
                "1",
                Ok(ToolCall::new("repeat", json!({"phrase": "never"}))),
            ),
        ]);
        let (agent, system) = agent_with(&provider);
        let agent = agent.with_max_turns(NonZeroUsize::new(1).unwrap());

        let outcome = agent.run("anything").await?;

        assert!(outcome.exhausted);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.text, "Let me check");
        assert_eq!(outcome.transcript.len(), 1);
        assert_eq!(system.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_never_exceeds_budget() -> anyhow::Result<()> {
        for budget in 1..=4 {
            let provider =
                MockProvider::new((0..10).map(|i| repeat(&i.to_string(), "again")).collect());
            let (agent, system) = agent_with(&provider);
            let agent = agent.with_max_turns(NonZeroUsize::new(budget).unwrap());

            let outcome = agent.run("loop forever").await?;

            assert_eq!(provider.call_count(), budget);
            assert_eq!(outcome.turns, budget);
            assert!(outcome.exhausted);
            assert_eq!(system.calls.load(Ordering::SeqCst), budget - 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_failure_ends_stream() {
        let provider = MockProvider::scripted(vec![
            Ok(repeat("1", "x")),
            Err("upstream 503".to_string()),
        ]);
        let (agent, _) = agent_with(&provider);

        let err = agent.run("go").await.unwrap_err();
        assert!(err.to_string().contains("upstream 503"));
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn test_system_prompt_lists_systems() {
        let provider = MockProvider::new(vec![]);
        let (agent, _) = agent_with(&provider);
        let agent = agent
            .with_persona("You are a currency conversion assistant.")
            .with_structured_replies(true);

        let prompt = agent.system_prompt();
        assert!(prompt.starts_with("You are a currency conversion assistant."));
        assert!(prompt.contains("## parrot"));
        assert!(prompt.contains("Use repeat when the user asks you to quote something."));
        assert!(prompt.contains(r#"{"status": "input_required""#));
    }

    #[test]
    fn test_seed_replays_history() {
        let provider = MockProvider::new(vec![]);
        let (agent, _) = agent_with(&provider);

        let history = vec![
            WireMessage::user("Convert 300 USD"),
            WireMessage::agent("To which currency?"),
        ];
        let seed = agent.seed(&history, "EUR");

        let roles: Vec<_> = seed.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(seed[3].text(), "EUR");
    }

    #[test]
    fn test_reply_status_parse() {
        assert_eq!(
            ReplyStatus::parse(r#"{"status": "input_required", "message": "Which currency?"}"#),
            ReplyStatus::InputRequired("Which currency?".to_string())
        );
        assert_eq!(
            ReplyStatus::parse("```json\n{\"status\": \"completed\", \"message\": \"276.0 EUR\"}\n```"),
            ReplyStatus::Completed("276.0 EUR".to_string())
        );
        assert_eq!(
            ReplyStatus::parse(r#"{"status": "error", "message": "rate service down"}"#),
            ReplyStatus::Error("rate service down".to_string())
        );
        assert_eq!(
            ReplyStatus::parse("300 USD is 276.0 EUR"),
            ReplyStatus::Completed("300 USD is 276.0 EUR".to_string())
        );
        assert_eq!(
            ReplyStatus::parse(r#"{"status": "input_required"}"#),
            ReplyStatus::InputRequired(DEFAULT_QUESTION.to_string())
        );
        assert_eq!(
            ReplyStatus::parse(r#"{"status": "input_required", "message": "  "}"#),
            ReplyStatus::InputRequired(DEFAULT_QUESTION.to_string())
        );
        assert_eq!(
            ReplyStatus::parse(r#"{"amount_eur": 276.0}"#),
            ReplyStatus::Completed(r#"{"amount_eur": 276.0}"#.to_string())
        );
    }
}
