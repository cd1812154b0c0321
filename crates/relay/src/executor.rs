use async_trait::async_trait;
use futures::TryStreamExt;

use crate::agent::{Agent, ReplyStatus};
use crate::errors::TaskError;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::protocol::WireMessage;
use crate::task::{Task, TaskEmitter};

/// What an executor needs to know about the request it is serving
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    /// Text of the newest inbound message
    pub user_input: String,
    /// Earlier messages of the same task, oldest first
    pub history: Vec<WireMessage>,
}

impl RequestContext {
    pub fn new<S: Into<String>>(task_id: S, context_id: S, user_input: S) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            user_input: user_input.into(),
            history: Vec::new(),
        }
    }

    /// Build from a task whose history ends with the message being served
    pub fn from_task(task: &Task) -> Self {
        let (current, earlier) = match task.history.split_last() {
            Some((current, earlier)) => (current.text(), earlier.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            user_input: current,
            history: earlier,
        }
    }
}

/// The unit a server runs for each inbound request
///
/// An implementation reports progress and its outcome only through the
/// emitter, and must leave the task closed: completed, failed, or waiting
/// for input.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        context: RequestContext,
        emitter: &mut TaskEmitter,
    ) -> Result<(), TaskError>;

    async fn cancel(&self, _task_id: &str) -> Result<(), TaskError> {
        Err(TaskError::CancelUnsupported)
    }
}

fn progress_text(message: &Message) -> String {
    let text = message.text();
    if !text.trim().is_empty() {
        return text;
    }
    let names: Vec<String> = message
        .tool_requests()
        .iter()
        .map(|request| match &request.tool_call {
            Ok(call) => call.name.clone(),
            Err(_) => "unknown tool".to_string(),
        })
        .collect();
    format!("Calling tools: {}", names.join(", "))
}

#[async_trait]
impl AgentExecutor for Agent {
    async fn execute(
        &self,
        context: RequestContext,
        emitter: &mut TaskEmitter,
    ) -> Result<(), TaskError> {
        let seed = self.seed(&context.history, &context.user_input);
        let mut stream = self.reply(&seed);

        let mut turns = 0;
        let mut last_text = String::new();
        let mut pending_tools = false;

        loop {
            let message = match stream.try_next().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(task_id = %context.task_id, error = %e, "provider failed");
                    return emitter.fail(format!("The agent could not finish the request: {}", e));
                }
            };

            if message.role != Role::Assistant {
                continue;
            }
            turns += 1;
            last_text = message.text();
            pending_tools = message.has_tool_requests();
            if pending_tools && turns < self.max_turns().get() {
                emitter.working(progress_text(&message))?;
            }
        }

        if pending_tools && last_text.trim().is_empty() {
            tracing::warn!(task_id = %context.task_id, turns, "turn budget exhausted without an answer");
            return emitter.fail("The agent ran out of turns before producing an answer.");
        }

        match ReplyStatus::parse(&last_text) {
            ReplyStatus::Completed(text) => emitter.complete(text),
            ReplyStatus::InputRequired(question) => emitter.input_required(question),
            ReplyStatus::Error(reason) => emitter.fail(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::{Tool, ToolCall};
    use crate::providers::mock::MockProvider;
    use crate::systems::{System, ToolRegistry};
    use crate::task::{EventReceiver, TaskEvent, TaskState, TaskStore};
    use serde_json::{json, Value};
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    struct RateSystem {
        tools: Vec<Tool>,
    }

    #[async_trait]
    impl System for RateSystem {
        fn name(&self) -> &str {
            "rates"
        }
        fn description(&self) -> &str {
            "Exchange rates"
        }
        fn instructions(&self) -> &str {
            ""
        }
        fn tools(&self) -> &[Tool] {
            &self.tools
        }
        async fn call(&self, _tool_call: ToolCall) -> crate::errors::AgentResult<Value> {
            Ok(json!({"rate": 0.92}))
        }
    }

    fn agent(provider: &MockProvider) -> Agent {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(RateSystem {
                tools: vec![Tool::new("get_rate", "Rate", json!({"type": "object"}))],
            }))
            .unwrap();
        Agent::new(Arc::new(provider.clone()), Arc::new(registry))
    }

    fn rate_request() -> Message {
        Message::assistant().with_tool_request("1", Ok(ToolCall::new("get_rate", json!({}))))
    }

    async fn execute(agent: &Agent) -> (Result<(), TaskError>, Vec<TaskEvent>) {
        let (mut emitter, mut receiver): (TaskEmitter, EventReceiver) =
            TaskEmitter::new("t1", "c1");
        let result = agent
            .execute(RequestContext::new("t1", "c1", "300 USD in EUR"), &mut emitter)
            .await;
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn test_progress_then_completed() {
        let provider = MockProvider::new(vec![
            rate_request(),
            Message::assistant().with_text("300 USD is 276.0 EUR"),
        ]);
        let (result, events) = execute(&agent(&provider)).await;

        assert!(result.is_ok());
        let states: Vec<_> = events.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![TaskState::Working, TaskState::Completed]);
        assert_eq!(events[0].text().as_deref(), Some("Calling tools: get_rate"));
        assert_eq!(events[1].text().as_deref(), Some("300 USD is 276.0 EUR"));
        assert_eq!(events.iter().filter(|e| e.is_final).count(), 1);
    }

    #[tokio::test]
    async fn test_structured_input_required() {
        let provider = MockProvider::new(vec![Message::assistant().with_text(
            r#"{"status": "input_required", "message": "Which currency do you want?"}"#,
        )]);
        let (_, events) = execute(&agent(&provider)).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, TaskState::InputRequired);
        assert!(!events[0].is_final);
        assert_eq!(
            events[0].text().as_deref(),
            Some("Which currency do you want?")
        );
    }

    #[tokio::test]
    async fn test_provider_failure_fails_task() {
        let provider = MockProvider::scripted(vec![Err("503 from upstream".to_string())]);
        let (result, events) = execute(&agent(&provider)).await;

        assert!(result.is_ok());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, TaskState::Failed);
        assert!(events[0].is_final);
        assert!(events[0].text().unwrap().contains("503 from upstream"));
    }

    #[tokio::test]
    async fn test_exhausted_without_text_fails() {
        let provider = MockProvider::new(vec![rate_request(), rate_request()]);
        let agent = agent(&provider).with_max_turns(NonZeroUsize::new(2).unwrap());
        let (_, events) = execute(&agent).await;

        let states: Vec<_> = events.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![TaskState::Working, TaskState::Failed]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_with_text_completes() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("Rate is 0.92").with_tool_request(
                "1",
                Ok(ToolCall::new("get_rate", json!({}))),
            ),
        ]);
        let agent = agent(&provider).with_max_turns(NonZeroUsize::new(1).unwrap());
        let (_, events) = execute(&agent).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, TaskState::Completed);
        assert_eq!(events[0].text().as_deref(), Some("Rate is 0.92"));
    }

    #[tokio::test]
    async fn test_default_cancel_is_unsupported() {
        let provider = MockProvider::new(vec![]);
        assert_eq!(
            agent(&provider).cancel("t1").await,
            Err(TaskError::CancelUnsupported)
        );
    }

    #[test]
    fn test_context_from_task() {
        let store = TaskStore::new();
        let task = store.begin(&WireMessage::user("first")).unwrap();
        let context = RequestContext::from_task(&task);
        assert_eq!(context.user_input, "first");
        assert!(context.history.is_empty());
        assert_eq!(context.task_id, task.id);
    }
}
