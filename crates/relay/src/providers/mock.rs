use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};

/// One scripted completion: either a message or a provider failure
pub type MockResponse = std::result::Result<Message, String>;

#[derive(Default)]
struct MockState {
    responses: VecDeque<MockResponse>,
    transcripts: Vec<Vec<Message>>,
    tools: Vec<Vec<String>>,
}

/// A mock provider that returns pre-configured responses for testing
///
/// Every call is recorded so tests can assert on what the model was shown.
/// Once the script runs out, an empty assistant message is returned.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock provider whose script may include failures
    pub fn scripted(responses: Vec<MockResponse>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                responses: responses.into(),
                ..Default::default()
            })),
        }
    }

    pub fn call_count(&self) -> usize {
        self.lock().transcripts.len()
    }

    /// The transcript passed to each call, in call order
    pub fn transcripts(&self) -> Vec<Vec<Message>> {
        self.lock().transcripts.clone()
    }

    /// The tool names offered on each call, in call order
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.lock().tools.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _temperature: Option<f32>,
    ) -> Result<(Message, Usage)> {
        let mut state = self.lock();
        state.transcripts.push(messages.to_vec());
        state
            .tools
            .push(tools.iter().map(|tool| tool.name.clone()).collect());

        match state.responses.pop_front() {
            Some(Ok(message)) => Ok((message, Usage::default())),
            Some(Err(reason)) => Err(anyhow!(reason)),
            // Return empty response if no more pre-configured responses
            None => Ok((Message::assistant().with_text(""), Usage::default())),
        }
    }
}
