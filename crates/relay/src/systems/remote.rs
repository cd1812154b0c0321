use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// An external tool server named in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServer {
    pub name: String,
    /// JSON-RPC endpoint accepting `tools/list` and `tools/call`
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl ToolServer {
    pub fn new<N: Into<String>, U: Into<String>>(name: N, url: U) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: String::new(),
        }
    }
}

#[derive(Deserialize)]
struct ListedTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    input_schema: Option<Value>,
}

#[derive(Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<ListedTool>,
}

/// Tools served over JSON-RPC by another process
///
/// The tool list is fetched once when connecting. Text parts of a call's
/// `content` are joined into the tool output.
pub struct RemoteSystem {
    client: Client,
    server: ToolServer,
    tools: Vec<Tool>,
    instructions: String,
}

impl RemoteSystem {
    pub async fn connect(server: ToolServer, timeout: Duration) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let result = rpc(&client, &server.url, METHOD_TOOLS_LIST, json!({})).await?;
        let listed: ToolList = serde_json::from_value(result).map_err(|e| {
            AgentError::ExecutionError(format!("{} sent a malformed tool list: {}", server.name, e))
        })?;

        let tools: Vec<Tool> = listed
            .tools
            .into_iter()
            .map(|tool| {
                let schema = tool
                    .input_schema
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                Tool::new(tool.name, tool.description, schema)
            })
            .collect();
        tracing::info!(server = %server.name, url = %server.url, tools = tools.len(), "connected tool server");

        let instructions = if server.description.is_empty() {
            format!("Tools provided by the {} server.", server.name)
        } else {
            server.description.clone()
        };

        Ok(Self {
            client,
            server,
            tools,
            instructions,
        })
    }
}

async fn rpc(client: &Client, url: &str, method: &str, params: Value) -> AgentResult<Value> {
    let request = JsonRpcRequest::new(method, params);
    let unreachable = |e: reqwest::Error| AgentError::ExecutionError(format!("{}: {}", url, e));

    let response = client
        .post(url)
        .json(&request)
        .send()
        .await
        .map_err(unreachable)?;
    let status = response.status();
    if !status.is_success() {
        return Err(AgentError::ExecutionError(format!("{} answered {}", url, status)));
    }

    let reply: JsonRpcResponse = response.json().await.map_err(unreachable)?;
    if let Some(error) = reply.error {
        return Err(AgentError::ExecutionError(format!(
            "{} (code {})",
            error.message, error.code
        )));
    }
    Ok(reply.result.unwrap_or(Value::Null))
}

fn content_text(result: &Value) -> Option<String> {
    let parts = result.get("content")?.as_array()?;
    let text: Vec<&str> = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    Some(text.join("\n"))
}

#[async_trait]
impl System for RemoteSystem {
    fn name(&self) -> &str {
        &self.server.name
    }

    fn description(&self) -> &str {
        &self.server.description
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        if !self.tools.iter().any(|tool| tool.name == tool_call.name) {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }

        let params = json!({"name": tool_call.name, "arguments": tool_call.arguments});
        let result = rpc(&self.client, &self.server.url, METHOD_TOOLS_CALL, params).await?;

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let output = match content_text(&result) {
            Some(text) => Value::String(text),
            None => result,
        };
        if is_error {
            return Err(AgentError::ExecutionError(match output {
                Value::String(text) => text,
                other => other.to_string(),
            }));
        }
        Ok(output)
    }
}
