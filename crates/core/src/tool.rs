//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what let the model act on the project: build a target,
//! inspect project structure, and so on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::surface::ActionButton;

/// Static description of a registered tool. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique tool name
    pub name: String,

    /// Description sent to the model
    pub description: String,

    /// Free-form tags (e.g. "build", "keil")
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// JSON Schema of the tool input
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// The output of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool considers its work successful
    pub success: bool,

    /// Ordered text content items
    pub content: Vec<String>,

    /// Affordances to surface to the user once the turn completes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionButton>,
}

impl ToolOutput {
    pub fn success(content: Vec<String>) -> Self {
        Self {
            success: true,
            content,
            actions: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: vec![message.into()],
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ActionButton) -> Self {
        self.actions.push(action);
        self
    }
}

/// The core Tool trait.
///
/// Tools are registered in the [`ToolRegistry`] and invoked by the
/// dispatcher when the model requests them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// Tags used for discovery.
    fn tags(&self) -> &[&str] {
        &[]
    }

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Progress message shown while the tool runs.
    fn invocation_message(&self, _input: &serde_json::Value) -> String {
        format!("Running {}", self.name())
    }

    /// Invoke the tool. The token is the turn-scoped cancellation signal.
    async fn invoke(
        &self,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> std::result::Result<ToolOutput, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            tags: self.tags().iter().map(|t| t.to_string()).collect(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools, in registration order.
///
/// Built once at startup and then shared read-only behind an `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors of every registered tool, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.descriptor())
            .collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
