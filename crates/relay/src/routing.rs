//! Deciding which downstream agents a request should go to.
//!
//! The model is asked for a compact JSON object of per-agent flags, with
//! one split request per selected agent when more than one is selected.
//! Anything that does not decode into that shape falls back to a
//! deterministic keyword match over the agents' skill tags.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::errors::{ProviderError, RoutingError};
use crate::models::card::AgentCard;
use crate::models::message::Message;
use crate::prompt_template::load_prompt;
use crate::providers::base::Provider;

const ROUTING_PROMPT: &str = include_str!("prompts/routing.md");
const ROUTING_SYSTEM: &str = "You decide which agents handle a user's request.";

/// One downstream agent the router may pick
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub id: String,
    pub card: AgentCard,
    /// Base url the card was discovered under
    pub url: String,
}

impl Capability {
    pub fn new<I: Into<String>, U: Into<String>>(id: I, card: AgentCard, url: U) -> Self {
        Self {
            id: id.into(),
            card,
            url: url.into(),
        }
    }
}

/// The ordered set of agents a router chooses between. Order breaks fallback ties.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    capabilities: Vec<Capability>,
    primary: usize,
}

impl CapabilityCatalog {
    /// `primary` defaults to the first capability
    pub fn new(capabilities: Vec<Capability>, primary: Option<&str>) -> Result<Self, RoutingError> {
        if capabilities.is_empty() {
            return Err(RoutingError::EmptyCatalog);
        }
        let primary = match primary {
            Some(id) => capabilities
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| RoutingError::UnknownPrimary(id.to_string()))?,
            None => 0,
        };
        Ok(Self {
            capabilities,
            primary,
        })
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn primary(&self) -> &Capability {
        &self.capabilities[self.primary]
    }

    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubRequest {
    pub capability_id: String,
    pub request: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Forward the original request, unmodified, to one agent
    Single {
        invoke: BTreeMap<String, bool>,
        target: String,
        source: RoutingSource,
    },
    /// Send each selected agent its own part of the request
    Split {
        invoke: BTreeMap<String, bool>,
        requests: Vec<SubRequest>,
        source: RoutingSource,
    },
}

impl RoutingDecision {
    fn single(catalog: &CapabilityCatalog, target: &str, source: RoutingSource) -> Self {
        let invoke = catalog
            .capabilities()
            .iter()
            .map(|c| (c.id.clone(), c.id == target))
            .collect();
        RoutingDecision::Single {
            invoke,
            target: target.to_string(),
            source,
        }
    }

    pub fn invoke(&self) -> &BTreeMap<String, bool> {
        match self {
            RoutingDecision::Single { invoke, .. } | RoutingDecision::Split { invoke, .. } => {
                invoke
            }
        }
    }

    pub fn source(&self) -> RoutingSource {
        match self {
            RoutingDecision::Single { source, .. } | RoutingDecision::Split { source, .. } => {
                *source
            }
        }
    }

    pub fn targets(&self) -> Vec<&str> {
        match self {
            RoutingDecision::Single { target, .. } => vec![target.as_str()],
            RoutingDecision::Split { requests, .. } => requests
                .iter()
                .map(|r| r.capability_id.as_str())
                .collect(),
        }
    }

    /// What each selected agent should be sent
    pub fn sub_requests(&self, original: &str) -> Vec<SubRequest> {
        match self {
            RoutingDecision::Single { target, .. } => vec![SubRequest {
                capability_id: target.clone(),
                request: original.to_string(),
            }],
            RoutingDecision::Split { requests, .. } => requests.clone(),
        }
    }
}

/// Remove a leading ```` ``` ```` or ```` ```json ```` line and a trailing fence
pub fn strip_fences(reply: &str) -> &str {
    let mut content = reply.trim();
    if let Some(rest) = content.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        content = rest[tag_len..].trim_start();
        if let Some(body) = content.strip_suffix("```") {
            content = body;
        }
    }
    content.trim()
}

fn split_key_matches(key: &str, capability_id: &str) -> bool {
    let key = key.to_lowercase();
    let id = capability_id.to_lowercase();
    if key == format!("{}prompt", id) {
        return true;
    }
    match id.strip_suffix("agent") {
        Some(stem) if !stem.is_empty() => key == format!("{}prompt", stem),
        _ => false,
    }
}

fn find_split(object: &Map<String, Value>, capability_id: &str) -> Option<String> {
    object
        .iter()
        .filter(|(key, _)| split_key_matches(key, capability_id))
        .find_map(|(_, value)| value.as_str())
        .map(str::trim)
        .filter(|request| !request.is_empty())
        .map(str::to_string)
}

/// Decode a model's routing reply against `catalog`.
///
/// Flags missing from the reply count as false. Keys that are neither a
/// capability id nor a split key are ignored.
pub fn parse_decision(
    catalog: &CapabilityCatalog,
    reply: &str,
) -> Result<RoutingDecision, RoutingError> {
    let content = strip_fences(reply);
    let object = match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(object)) => object,
        _ => {
            let snippet: String = content.chars().take(80).collect();
            return Err(RoutingError::NotAnObject(snippet));
        }
    };

    let mut invoke = BTreeMap::new();
    let mut selected = Vec::new();
    for capability in catalog.capabilities() {
        let flag = match object.get(&capability.id) {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(RoutingError::InvalidFlag(capability.id.clone())),
        };
        invoke.insert(capability.id.clone(), flag);
        if flag {
            selected.push(capability.id.as_str());
        }
    }

    match selected.as_slice() {
        [] => Err(RoutingError::NoTarget),
        [target] => Ok(RoutingDecision::Single {
            invoke,
            target: target.to_string(),
            source: RoutingSource::Model,
        }),
        targets => {
            let requests = targets
                .iter()
                .map(|id| {
                    find_split(&object, id)
                        .map(|request| SubRequest {
                            capability_id: id.to_string(),
                            request,
                        })
                        .ok_or_else(|| RoutingError::MissingSplit(id.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RoutingDecision::Split {
                invoke,
                requests,
                source: RoutingSource::Model,
            })
        }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pick the capability whose skill tags share the most words with the request.
/// Ties go to the earlier capability; no overlap at all picks the primary.
pub fn fallback_decision(catalog: &CapabilityCatalog, request: &str) -> RoutingDecision {
    let request_words = words(request);

    let mut best: Option<(&Capability, usize)> = None;
    for capability in catalog.capabilities() {
        let tag_words: HashSet<String> = capability
            .card
            .tags()
            .iter()
            .flat_map(|tag| words(tag))
            .collect();
        let overlap = tag_words.intersection(&request_words).count();
        if overlap > best.map_or(0, |(_, score)| score) {
            best = Some((capability, overlap));
        }
    }

    let target = best.map_or(catalog.primary(), |(capability, _)| capability);
    RoutingDecision::single(catalog, &target.id, RoutingSource::Fallback)
}

#[derive(Serialize)]
struct CapabilityView<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct RoutingContext<'a> {
    capabilities: Vec<CapabilityView<'a>>,
    request: &'a str,
}

/// Asks the model for a routing decision. Holds no state between calls.
pub struct RoutingEngine {
    provider: Arc<dyn Provider>,
    temperature: Option<f32>,
}

impl RoutingEngine {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            temperature: Some(0.0),
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn render_prompt(
        &self,
        catalog: &CapabilityCatalog,
        request: &str,
    ) -> Result<String, tera::Error> {
        let context = RoutingContext {
            capabilities: catalog
                .capabilities()
                .iter()
                .map(|c| CapabilityView {
                    id: &c.id,
                    name: &c.card.name,
                    description: &c.card.description,
                    tags: c.card.tags(),
                })
                .collect(),
            request,
        };
        load_prompt(ROUTING_PROMPT, &context)
    }

    /// Only a failed completion is an error. A reply that cannot be used
    /// becomes the keyword fallback.
    pub async fn decide(
        &self,
        catalog: &CapabilityCatalog,
        request: &str,
    ) -> Result<RoutingDecision, ProviderError> {
        let prompt = match self.render_prompt(catalog, request) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(error = %e, "could not render routing prompt");
                return Ok(fallback_decision(catalog, request));
            }
        };

        let messages = vec![
            Message::system().with_text(ROUTING_SYSTEM),
            Message::user().with_text(prompt),
        ];
        let (reply, _) = self
            .provider
            .complete(&messages, &[], self.temperature)
            .await?;

        match parse_decision(catalog, &reply.text()) {
            Ok(decision) => {
                tracing::info!(targets = ?decision.targets(), "routing decided by model");
                Ok(decision)
            }
            Err(e) => {
                let decision = fallback_decision(catalog, request);
                tracing::warn!(
                    error = %e,
                    targets = ?decision.targets(),
                    "routing reply rejected, using keyword fallback"
                );
                Ok(decision)
            }
        }
    }
}
