use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolCall};

mod registry;
mod remote;

pub use registry::{render_tool_output, ToolRegistry};
pub use remote::{RemoteSystem, ToolServer};

/// Core trait that defines a system that can be operated by an AI agent
///
/// A system owns a group of tools. Tool names are global across every
/// system registered with one agent.
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters
    ///
    /// Arguments have already been checked against the tool's required list.
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value>;
}
