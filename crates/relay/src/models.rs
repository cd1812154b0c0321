//! These models represent the objects passed around by an agent
//!
//! There are several different related formats we need to interact with:
//! - openai-style chat messages/tools, sent from the agent to the completion provider
//! - peer wire messages (parts, artifacts), exchanged between agents over JSON-RPC
//! - tool calls, sent from the agent to the systems providing capabilities
//! - agent cards, served for discovery and fed to routing
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exact match to any of these formats.
pub mod card;
pub mod message;
pub mod role;
pub mod tool;
