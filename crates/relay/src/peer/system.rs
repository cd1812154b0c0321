use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Peer, PeerClient};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::sanitize_function_name;
use crate::systems::System;

/// Exposes peer agents as tools, so the model can delegate a request itself
pub struct PeerSystem {
    client: PeerClient,
    peers: Vec<Peer>,
    tools: Vec<Tool>,
    instructions: String,
}

impl PeerSystem {
    pub fn new(client: PeerClient, peers: Vec<Peer>) -> Self {
        let tools = peers
            .iter()
            .map(|peer| {
                let description = if peer.description.is_empty() {
                    format!("Send a request to the {} agent and return its answer", peer.id)
                } else {
                    peer.description.clone()
                };
                Tool::new(
                    Self::tool_name(peer),
                    description,
                    json!({
                        "type": "object",
                        "properties": {
                            "request": {
                                "type": "string",
                                "description": "The full request for this agent, in plain language"
                            }
                        },
                        "required": ["request"]
                    }),
                )
            })
            .collect();

        let instructions = format!(
            "Each ask_ tool forwards a request to another agent ({}). \
             Include every detail the agent needs, since it cannot see this conversation.",
            peers
                .iter()
                .map(|peer| peer.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            client,
            peers,
            tools,
            instructions,
        }
    }

    pub fn tool_name(peer: &Peer) -> String {
        sanitize_function_name(&format!("ask_{}", peer.id))
    }
}

#[async_trait]
impl System for PeerSystem {
    fn name(&self) -> &str {
        "peers"
    }

    fn description(&self) -> &str {
        "Other agents reachable over the network"
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        let peer = self
            .peers
            .iter()
            .find(|peer| Self::tool_name(peer) == tool_call.name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_call.name.clone()))?;

        let request = tool_call
            .arguments
            .get("request")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentError::InvalidParameters("request must be a string".to_string())
            })?;

        // Peer failures come back as degraded text, never as a tool error
        Ok(Value::String(self.client.invoke(&peer.url, request).await))
    }
}
