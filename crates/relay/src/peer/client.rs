use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::errors::PeerError;
use crate::models::card::AgentCard;
use crate::protocol::{
    JsonRpcRequest, MessageSendParams, WireMessage, AGENT_CARD_PATH, LEGACY_AGENT_CARD_PATH,
    METHOD_MESSAGE_SEND,
};

pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends requests to peer agents and turns whatever comes back into text
///
/// Each request (card discovery, message send) is bounded by the client's
/// timeout. Nothing is retried.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
    timeout: Duration,
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TIMEOUT)
    }
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn within_deadline<T, F>(&self, fut: F) -> Result<T, PeerError>
    where
        F: Future<Output = Result<T, PeerError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PeerError::Timeout(self.timeout))?
    }

    /// Fetch the agent card, trying the legacy well-known path when the current one is missing
    pub async fn resolve_card(&self, base_url: &str) -> Result<AgentCard, PeerError> {
        let base = base_url.trim_end_matches('/');
        self.within_deadline(async {
            let url = format!("{}{}", base, AGENT_CARD_PATH);
            if let Some(card) = self.fetch_card(&url).await? {
                return Ok(card);
            }

            tracing::debug!(%url, "agent card not found, trying legacy path");
            let legacy = format!("{}{}", base, LEGACY_AGENT_CARD_PATH);
            match self.fetch_card(&legacy).await? {
                Some(card) => Ok(card),
                None => Err(PeerError::Discovery {
                    url: legacy,
                    reason: StatusCode::NOT_FOUND.to_string(),
                }),
            }
        })
        .await
    }

    // Ok(None) when the path answered 404
    async fn fetch_card(&self, url: &str) -> Result<Option<AgentCard>, PeerError> {
        let discovery = |reason: String| PeerError::Discovery {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| discovery(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(discovery(status.to_string()));
        }

        response
            .json::<AgentCard>()
            .await
            .map(Some)
            .map_err(|e| discovery(format!("malformed card: {}", e)))
    }

    /// Post one `message/send` request to the card's endpoint and return the raw reply body
    pub async fn send_message(
        &self,
        card: &AgentCard,
        base_url: &str,
        message: WireMessage,
    ) -> Result<Value, PeerError> {
        let endpoint = if card.url.is_empty() {
            base_url
        } else {
            card.url.as_str()
        };
        let params = serde_json::to_value(MessageSendParams { message })
            .map_err(|e| PeerError::Envelope(e.to_string()))?;
        let request = JsonRpcRequest::new(METHOD_MESSAGE_SEND, params);

        self.within_deadline(async {
            let response = self.client.post(endpoint).json(&request).send().await?;
            let status = response.status();
            let body = response.text().await?;
            serde_json::from_str::<Value>(&body).map_err(|_| {
                PeerError::Envelope(format!("{} returned a non-JSON body ({})", endpoint, status))
            })
        })
        .await
    }

    /// Discover the peer and send it `text`, returning the extracted reply
    pub async fn try_invoke(&self, base_url: &str, text: &str) -> Result<String, PeerError> {
        let card = self.resolve_card(base_url).await?;
        self.invoke_with_card(&card, base_url, text).await
    }

    async fn invoke_with_card(
        &self,
        card: &AgentCard,
        base_url: &str,
        text: &str,
    ) -> Result<String, PeerError> {
        tracing::info!(peer = %card.name, "sending request to peer");
        let body = self
            .send_message(card, base_url, WireMessage::user(text))
            .await?;
        Ok(interpret_reply(&card.name, &body))
    }

    /// Like [`PeerClient::try_invoke`], but every failure becomes a degraded reply string
    pub async fn invoke(&self, base_url: &str, text: &str) -> String {
        let card = match self.resolve_card(base_url).await {
            Ok(card) => card,
            Err(e) => {
                tracing::warn!(peer = %base_url, error = %e, "peer discovery failed");
                return degraded(base_url, &e);
            }
        };

        match self.invoke_with_card(&card, base_url, text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(peer = %card.name, error = %e, "peer call failed");
                degraded(&card.name, &e)
            }
        }
    }
}

fn degraded(label: &str, error: &PeerError) -> String {
    format!("({} error: {})", label, error)
}

/// Pull a text answer out of a JSON-RPC reply body.
///
/// An `error` member becomes `(<name> error: <message>)`. Otherwise the first
/// text part of a message result wins, then artifact parts and the status
/// message of a task result.
pub fn interpret_reply(peer_name: &str, body: &Value) -> String {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return format!("({} error: {})", peer_name, message);
    }

    let result = body.get("result").unwrap_or(&Value::Null);

    let from_artifacts = || {
        result
            .get("artifacts")
            .and_then(Value::as_array)
            .and_then(|artifacts| artifacts.iter().find_map(first_text_part))
    };
    let from_status = || {
        result
            .get("status")
            .and_then(|status| status.get("message"))
            .and_then(first_text_part)
    };

    first_text_part(result)
        .or_else(from_artifacts)
        .or_else(from_status)
        .unwrap_or_else(|| {
            tracing::warn!(peer = %peer_name, "peer reply had no text part");
            format!("({} did not return a usable text response.)", peer_name)
        })
}

fn first_text_part(holder: &Value) -> Option<String> {
    holder.get("parts")?.as_array()?.iter().find_map(|part| {
        if part.get("kind").and_then(Value::as_str) == Some("text") {
            part.get("text").and_then(Value::as_str).map(str::to_string)
        } else {
            None
        }
    })
}
