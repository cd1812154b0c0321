use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{chat_completions_url, create_chat_request, send_chat_request};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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
        let request = self
            .client
            .post(chat_completions_url(&self.config.host))
            .bearer_auth(&self.config.api_key);
        send_chat_request(request, &payload).await
    }
}
