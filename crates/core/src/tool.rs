//! Model-callable tools.
//!
//! A tool answers with a JSON payload. Failures the model should read and
//! react to (missing keys, upstream errors) belong in that payload as
//! `{"error": ...}`; `Err` is reserved for calls that cannot be made at all.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// One call requested by the model, arguments already parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Payload of a finished call, tagged with the id the model gave it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: Value,
}

impl ToolResult {
    /// Whether the tool reported a failure inside its payload.
    pub fn is_error(&self) -> bool {
        self.output.get("error").is_some()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by, e.g. `web_search`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tools offered on one turn, keyed and listed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let output = tool.call(call.arguments.clone()).await?;
        Ok(ToolResult {
            call_id: call.id.clone(),
            output,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Upper-cases `text`; reports an empty one as a payload error.
    struct Shout;

    #[async_trait]
    impl Tool for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Upper-case some text"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
            if text.is_empty() {
                return Ok(serde_json::json!({ "error": "nothing to shout" }));
            }
            Ok(serde_json::json!({ "text": text.to_uppercase() }))
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_7".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn definitions_follow_registered_tools() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(Shout));
        registry.register(Box::new(Shout));
        assert_eq!(registry.len(), 1);
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "shout");
        assert_eq!(defs[0].parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn execute_tags_output_with_call_id() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout));

        let result = registry.execute(&call("shout", serde_json::json!({"text": "hi"}))).await.unwrap();
        assert_eq!(result.call_id, "call_7");
        assert_eq!(result.output["text"], "HI");
        assert!(!result.is_error());

        let soft = registry.execute(&call("shout", serde_json::json!({"text": ""}))).await.unwrap();
        assert!(soft.is_error());
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout));

        let missing = registry.execute(&call("whisper", serde_json::json!({}))).await;
        assert!(matches!(missing, Err(ToolError::NotFound(name)) if name == "whisper"));
        let invalid = registry.execute(&call("shout", serde_json::json!({}))).await;
        assert!(matches!(invalid, Err(ToolError::InvalidArguments(_))));
    }
}
