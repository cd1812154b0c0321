use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref TOOL_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").unwrap();
}

/// Tools from every registered system, keyed by tool name
///
/// Built once before serving and shared behind an `Arc`; lookups never mutate.
#[derive(Default)]
pub struct ToolRegistry {
    systems: Vec<Arc<dyn System>>,
    // tool name -> (index into systems, declared tool)
    tools: HashMap<String, (usize, Tool)>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system and all of its tools.
    ///
    /// Fails without registering anything if a tool name is malformed,
    /// already taken, or declares a schema that is not a JSON object schema.
    pub fn register(&mut self, system: Arc<dyn System>) -> AgentResult<()> {
        let mut seen = Vec::new();
        for tool in system.tools() {
            if !TOOL_NAME.is_match(&tool.name) {
                return Err(AgentError::InvalidParameters(format!(
                    "tool name '{}' must match [a-zA-Z0-9_-]{{1,64}}",
                    tool.name
                )));
            }
            if self.tools.contains_key(&tool.name) || seen.contains(&&tool.name) {
                return Err(AgentError::InvalidParameters(format!(
                    "tool '{}' is already registered",
                    tool.name
                )));
            }
            let is_object_schema = tool.input_schema.is_object()
                && tool
                    .input_schema
                    .get("type")
                    .map_or(true, |t| t.as_str() == Some("object"));
            if !is_object_schema {
                return Err(AgentError::InvalidParameters(format!(
                    "tool '{}' must declare an object schema",
                    tool.name
                )));
            }
            seen.push(&tool.name);
        }

        let index = self.systems.len();
        for tool in system.tools() {
            tracing::debug!(system = system.name(), tool = %tool.name, "registered tool");
            self.order.push(tool.name.clone());
            self.tools.insert(tool.name.clone(), (index, tool.clone()));
        }
        self.systems.push(system);
        Ok(())
    }

    /// Declared tools in registration order
    pub fn describe(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).map(|(_, tool)| tool.clone()))
            .collect()
    }

    pub fn systems(&self) -> &[Arc<dyn System>] {
        &self.systems
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one tool by name after checking its arguments against the schema's required list
    pub async fn invoke(&self, name: &str, arguments: Value) -> AgentResult<Value> {
        let (index, tool) = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let args = arguments.as_object().ok_or_else(|| {
            AgentError::InvalidParameters(format!("arguments for '{}' must be an object", name))
        })?;

        let missing: Vec<&str> = tool
            .required_arguments()
            .into_iter()
            .filter(|required| !args.contains_key(*required))
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::InvalidParameters(format!(
                "missing required argument(s) for '{}': {}",
                name,
                missing.join(", ")
            )));
        }

        self.systems[*index]
            .call(ToolCall::new(name, arguments))
            .await
    }
}

/// Render a tool's return value as the text of a tool message.
///
/// Strings are inserted verbatim, anything else becomes compact JSON.
pub fn render_tool_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct CalculatorSystem {
        tools: Vec<Tool>,
    }

    impl CalculatorSystem {
        fn new() -> Self {
            Self {
                tools: vec![Tool::new(
                    "add",
                    "Adds two numbers",
                    json!({
                        "type": "object",
                        "properties": {
                            "a": {"type": "number"},
                            "b": {"type": "number"}
                        },
                        "required": ["a", "b"]
                    }),
                )],
            }
        }
    }

    #[async_trait]
    impl System for CalculatorSystem {
        fn name(&self) -> &str {
            "calculator"
        }

        fn description(&self) -> &str {
            "Arithmetic"
        }

        fn instructions(&self) -> &str {
            "Use add for sums"
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
            let a = tool_call.arguments["a"].as_f64().unwrap_or_default();
            let b = tool_call.arguments["b"].as_f64().unwrap_or_default();
            Ok(json!({"sum": a + b}))
        }
    }

    struct SingleTool(Vec<Tool>);

    #[async_trait]
    impl System for SingleTool {
        fn name(&self) -> &str {
            "single"
        }
        fn description(&self) -> &str {
            ""
        }
        fn instructions(&self) -> &str {
            ""
        }
        fn tools(&self) -> &[Tool] {
            &self.0
        }
        async fn call(&self, _tool_call: ToolCall) -> AgentResult<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_invoke_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorSystem::new())).unwrap();

        let result = registry.invoke("add", json!({"a": 1, "b": 2})).await.unwrap();
        assert_eq!(result, json!({"sum": 3.0}));
        assert_eq!(registry.describe()[0].name, "add");
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", json!({})).await.unwrap_err();
        assert_eq!(err, AgentError::ToolNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_invoke_missing_required() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorSystem::new())).unwrap();

        let err = registry.invoke("add", json!({"a": 1})).await.unwrap_err();
        match err {
            AgentError::InvalidParameters(msg) => assert!(msg.contains("b")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = registry.invoke("add", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorSystem::new())).unwrap();
        let err = registry
            .register(Arc::new(CalculatorSystem::new()))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
        assert_eq!(registry.systems().len(), 1);
    }

    #[test]
    fn test_register_rejects_bad_schema_and_name() {
        let mut registry = ToolRegistry::new();

        let bad_schema = SingleTool(vec![Tool::new("list", "", json!({"type": "array"}))]);
        assert!(registry.register(Arc::new(bad_schema)).is_err());

        let bad_name = SingleTool(vec![Tool::new("has space", "", json!({"type": "object"}))]);
        assert!(registry.register(Arc::new(bad_name)).is_err());

        assert!(registry.is_empty());
    }

    #[test]
    fn test_render_tool_output() {
        assert_eq!(
            render_tool_output(&json!("300 USD = 276.0 EUR")),
            "300 USD = 276.0 EUR"
        );
        assert_eq!(render_tool_output(&json!({"rate": 0.92})), r#"{"rate":0.92}"#);
        assert_eq!(render_tool_output(&json!(42)), "42");
    }
}
