use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::base::Usage;
use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Name sent in place of a tool call the model produced with an unusable name.
/// The matching tool message always explains the error.
const INVALID_TOOL_NAME: &str = "invalid_tool_name";

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        if message.role == Role::Tool {
            for content in &message.content {
                if let MessageContent::ToolResponse(response) = content {
                    messages_spec.push(json!({
                        "role": "tool",
                        "content": response.output,
                        "tool_call_id": response.id
                    }));
                }
            }
            continue;
        }

        let mut converted = json!({
            "role": message.role.as_str()
        });

        let text = message.text();
        if !text.is_empty() {
            converted["content"] = json!(text);
        }

        let tool_calls: Vec<Value> = message
            .tool_requests()
            .into_iter()
            .map(|request| match &request.tool_call {
                Ok(tool_call) => json!({
                    "id": request.id,
                    "type": "function",
                    "function": {
                        "name": sanitize_function_name(&tool_call.name),
                        "arguments": tool_call.arguments.to_string(),
                    }
                }),
                // The request still needs an entry so the tool message answering it lines up
                Err(_) => json!({
                    "id": request.id,
                    "type": "function",
                    "function": {
                        "name": INVALID_TOOL_NAME,
                        "arguments": "{}",
                    }
                }),
            })
            .collect();

        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            messages_spec.push(converted);
        } else if message.role == Role::Assistant {
            converted["content"] = json!("");
            messages_spec.push(converted);
        }
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .cloned()
        .ok_or_else(|| anyhow!("Response contained no choices: {}", response))?;

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
            } else {
                message =
                    message.with_tool_request(id, Ok(ToolCall::from_raw(function_name, arguments)));
            }
        }
    }

    Ok(message)
}

pub fn get_openai_usage(data: &Value) -> Usage {
    let usage = data.get("usage");
    let field = |name: &str| {
        usage
            .and_then(|u| u.get(name))
            .and_then(Value::as_i64)
            .map(|v| v as i32)
    };

    let input_tokens = field("prompt_tokens");
    let output_tokens = field("completion_tokens");
    let total_tokens = field("total_tokens").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

pub fn chat_completions_url(host: &str) -> String {
    format!("{}/v1/chat/completions", host.trim_end_matches('/'))
}

/// Body of a chat completions request
pub fn create_chat_request(
    model: &str,
    messages: &[Message],
    tools: &[Tool],
    temperature: Option<f32>,
    max_tokens: Option<i32>,
) -> Result<Value> {
    let tools_spec = tools_to_openai_spec(tools)?;
    let mut payload = json!({
        "model": model,
        "messages": messages_to_openai_spec(messages),
    });
    let body = payload
        .as_object_mut()
        .ok_or_else(|| anyhow!("payload is not an object"))?;

    if !tools_spec.is_empty() {
        body.insert("tools".to_string(), json!(tools_spec));
    }
    if let Some(temperature) = temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }
    Ok(payload)
}

/// Send a chat completions request and decode the single reply it carries
pub async fn send_chat_request(
    request: reqwest::RequestBuilder,
    payload: &Value,
) -> Result<(Message, Usage)> {
    let response = request.json(payload).send().await?;
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(anyhow!("Server error: {}", status));
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    // Error objects can come back under any status
    if let Some(error) = body.get("error").filter(|error| !error.is_null()) {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err.into());
        }
        return Err(anyhow!("Request failed: {}\nResponse: {}", status, error));
    }
    if !status.is_success() {
        return Err(anyhow!("Request failed: {}", status));
    }

    let usage = get_openai_usage(&body);
    let message = openai_response_to_message(body)?;
    Ok((message, usage))
}
