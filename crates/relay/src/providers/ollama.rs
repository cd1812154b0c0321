use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::{chat_completions_url, create_chat_request, send_chat_request};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

/// Talks to a local Ollama server through its OpenAI compatible endpoint
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        // Local models can be slow to load
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
        temperature: Option<f32>,
    ) -> Result<(Message, Usage)> {
        let payload = create_chat_request(
            &self.config.model,
            messages,
            tools,
            temperature.or(self.config.temperature),
            self.config.max_tokens,
        )?;
        let request = self.client.post(chat_completions_url(&self.config.host));
        send_chat_request(request, &payload).await
    }
}
