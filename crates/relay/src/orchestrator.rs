use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::agent::DEFAULT_PERSONA;
use crate::errors::{ProviderError, RoutingError, TaskError};
use crate::executor::{AgentExecutor, RequestContext};
use crate::models::card::AgentCard;
use crate::models::message::Message;
use crate::peer::{Peer, PeerClient};
use crate::prompt_template::load_prompt;
use crate::providers::base::Provider;
use crate::routing::{Capability, CapabilityCatalog, RoutingEngine, SubRequest};
use crate::task::TaskEmitter;

const SYNTHESIS_PROMPT: &str = include_str!("prompts/synthesis.md");

#[derive(Debug, Clone, Serialize)]
pub struct PeerReply {
    pub agent: String,
    pub text: String,
}

#[derive(Serialize)]
struct SynthesisContext<'a> {
    request: &'a str,
    replies: &'a [PeerReply],
}

/// Fetch each peer's card to build a routing catalog.
///
/// A peer whose card cannot be fetched is still routable, described by its
/// configured description.
pub async fn discover_catalog(
    client: &PeerClient,
    peers: &[Peer],
    primary: Option<&str>,
) -> Result<CapabilityCatalog, RoutingError> {
    let cards = join_all(peers.iter().map(|peer| client.resolve_card(&peer.url))).await;

    let capabilities = peers
        .iter()
        .zip(cards)
        .map(|(peer, card)| {
            let card = card.unwrap_or_else(|e| {
                tracing::warn!(peer = %peer.id, error = %e, "using configured description for peer");
                AgentCard::new(&peer.id, &peer.description, "")
            });
            Capability::new(&peer.id, card, &peer.url)
        })
        .collect();

    CapabilityCatalog::new(capabilities, primary)
}

/// Routes each request to one or more peer agents and merges their answers
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    routing: RoutingEngine,
    catalog: CapabilityCatalog,
    peers: PeerClient,
    persona: String,
    temperature: Option<f32>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, catalog: CapabilityCatalog, peers: PeerClient) -> Self {
        Self {
            routing: RoutingEngine::new(provider.clone()),
            provider,
            catalog,
            peers,
            persona: DEFAULT_PERSONA.to_string(),
            temperature: None,
        }
    }

    pub fn with_persona<S: Into<String>>(mut self, persona: S) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    /// Send every sub-request concurrently. Failed peers come back as degraded text.
    pub async fn delegate(&self, requests: &[SubRequest]) -> Vec<PeerReply> {
        let calls = requests.iter().map(|sub| async move {
            match self.catalog.get(&sub.capability_id) {
                Some(capability) => PeerReply {
                    agent: capability.card.name.clone(),
                    text: self.peers.invoke(&capability.url, &sub.request).await,
                },
                None => PeerReply {
                    agent: sub.capability_id.clone(),
                    text: format!("({} is not a known agent.)", sub.capability_id),
                },
            }
        });
        join_all(calls).await
    }

    /// Ask the model for one answer built from the peers' replies
    pub async fn synthesize(
        &self,
        request: &str,
        replies: &[PeerReply],
    ) -> Result<String, ProviderError> {
        let prompt = load_prompt(SYNTHESIS_PROMPT, &SynthesisContext { request, replies })
            .map_err(|e| ProviderError(format!("could not render synthesis prompt: {}", e)))?;

        let messages = vec![
            Message::system().with_text(&self.persona),
            Message::user().with_text(prompt),
        ];
        let (response, _) = self
            .provider
            .complete(&messages, &[], self.temperature)
            .await?;

        let text = response.text();
        if text.trim().is_empty() {
            // Nothing to merge with, so hand back what the peers said
            return Ok(replies
                .iter()
                .map(|reply| format!("{}: {}", reply.agent, reply.text))
                .collect::<Vec<_>>()
                .join("\n\n"));
        }
        Ok(text)
    }
}

#[async_trait]
impl AgentExecutor for Orchestrator {
    async fn execute(
        &self,
        context: RequestContext,
        emitter: &mut TaskEmitter,
    ) -> Result<(), TaskError> {
        let request = context.user_input.as_str();

        let decision = match self.routing.decide(&self.catalog, request).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(task_id = %context.task_id, error = %e, "routing failed");
                return emitter.fail(format!("Could not decide which agents to ask: {}", e));
            }
        };

        let requests = decision.sub_requests(request);
        let names: Vec<&str> = requests
            .iter()
            .map(|sub| {
                self.catalog
                    .get(&sub.capability_id)
                    .map_or(sub.capability_id.as_str(), |c| c.card.name.as_str())
            })
            .collect();
        emitter.working(format!("Asking {}", names.join(" and ")))?;

        let replies = self.delegate(&requests).await;
        emitter.working("Combining the answers")?;

        match self.synthesize(request, &replies).await {
            Ok(answer) => emitter.complete(answer),
            Err(e) => {
                tracing::error!(task_id = %context.task_id, error = %e, "synthesis failed");
                emitter.fail(format!("Could not combine the agents' answers: {}", e))
            }
        }
    }
}
