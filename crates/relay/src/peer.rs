//! Calling other agents over the agent-to-agent wire protocol.

use serde::{Deserialize, Serialize};

mod client;
mod system;

pub use client::{interpret_reply, PeerClient, DEFAULT_PEER_TIMEOUT};
pub use system::PeerSystem;

/// A downstream agent this agent may delegate to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Short identifier, used in tool names and routing flags
    pub id: String,
    /// Base url the agent card is discovered under
    pub url: String,
    /// Used when the peer's card cannot be fetched
    #[serde(default)]
    pub description: String,
}

impl Peer {
    pub fn new<I: Into<String>, U: Into<String>>(id: I, url: U) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            description: String::new(),
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}
