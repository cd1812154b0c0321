use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A JSON Schema object describing the accepted arguments
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Names listed under the schema's `required` array
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A tool call request that a system can execute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution, always a JSON object
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new ToolCall with the given name and arguments
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from the serialized argument payload a model produced.
    ///
    /// Payloads that are not valid JSON, or that decode to something other
    /// than an object, become an empty argument set.
    pub fn from_raw<S: Into<String>>(name: S, raw_arguments: &str) -> Self {
        let name = name.into();
        let arguments = match serde_json::from_str::<Value>(raw_arguments) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) if raw_arguments.trim().is_empty() => Value::Object(Map::new()),
            Ok(other) => {
                tracing::warn!(tool = %name, payload = %other, "tool arguments are not an object");
                Value::Object(Map::new())
            }
            Err(e) => {
                if !raw_arguments.trim().is_empty() {
                    tracing::warn!(tool = %name, error = %e, "could not decode tool arguments");
                }
                Value::Object(Map::new())
            }
        };
        Self { name, arguments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_object() {
        let call = ToolCall::from_raw("convert", r#"{"amount": 300, "to": "EUR"}"#);
        assert_eq!(call.arguments, json!({"amount": 300, "to": "EUR"}));
    }

    #[test]
    fn test_from_raw_malformed_is_empty() {
        let call = ToolCall::from_raw("convert", "invalid json {");
        assert_eq!(call.arguments, json!({}));

        let call = ToolCall::from_raw("convert", "[1, 2]");
        assert_eq!(call.arguments, json!({}));

        let call = ToolCall::from_raw("convert", "");
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn test_required_arguments() {
        let tool = Tool::new(
            "convert",
            "Convert currency",
            json!({"type": "object", "required": ["amount", "to"]}),
        );
        assert_eq!(tool.required_arguments(), vec!["amount", "to"]);

        let tool = Tool::new("ping", "Ping", json!({"type": "object"}));
        assert!(tool.required_arguments().is_empty());
    }
}
