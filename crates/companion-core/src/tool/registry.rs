//! Tool trait and the ordered registry handed to the dispatch agent.
//!
//! `Tool` uses RPITIT like the repository traits; `ToolDyn` is the
//! object-safe twin so heterogeneous tools can share one registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use companion_types::llm::ToolDefinition;

/// Errors from tool lookup and execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool failed: {0}")]
    Failed(String),

    #[error("tool timed out after {0}s")]
    Timeout(u64),
}

/// A capability the generator can call by name with JSON arguments.
pub trait Tool: Send + Sync {
    /// Name advertised to the generator.
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the tool; the returned text is fed back to the generator.
    fn invoke(
        &self,
        arguments: serde_json::Value,
    ) -> impl Future<Output = Result<String, ToolError>> + Send;
}

/// Object-safe version of [`Tool`] with a boxed future.
pub trait ToolDyn: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> serde_json::Value;

    fn invoke_boxed(
        &self,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + '_>>;
}

impl<T: Tool> ToolDyn for T {
    fn id(&self) -> &str {
        Tool::id(self)
    }

    fn description(&self) -> &str {
        Tool::description(self)
    }

    fn input_schema(&self) -> serde_json::Value {
        Tool::input_schema(self)
    }

    fn invoke_boxed(
        &self,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + '_>> {
        Box::pin(self.invoke(arguments))
    }
}

/// Ordered, cheaply clonable set of tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A tool with the same id replaces the earlier one.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let tool: Arc<dyn ToolDyn> = Arc::new(tool);
        match self.tools.iter().position(|t| t.id() == tool.id()) {
            Some(index) => self.tools[index] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.id()).collect()
    }

    /// Function definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.id().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Invoke a tool by id.
    pub async fn invoke(
        &self,
        id: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| ToolError::UnknownTool(id.to_string()))?;
        tool.invoke_boxed(arguments).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    impl Tool for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            self.0
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            arguments["text"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_by_id() {
        let registry = ToolRegistry::new().with(Echo("echo text"));
        let out = registry.invoke("echo", json!({"text": "hey"})).await.unwrap();
        assert_eq!(out, "hey");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("nope".into()));
    }

    #[test]
    fn same_id_replaces_earlier_tool() {
        let registry = ToolRegistry::new().with(Echo("first")).with(Echo("second"));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].description, "second");
    }
}
