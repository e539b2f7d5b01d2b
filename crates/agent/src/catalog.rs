//! Tool catalog: which tools the model may see on the next request.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use keilpilot_core::provider::{ToolDefinition, ToolMode};
use keilpilot_core::tool::{Tool, ToolDescriptor, ToolRegistry};
use tracing::{debug, warn};

/// Tools offered on one model request, and whether one must be called.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSelection {
    pub tools: Vec<ToolDescriptor>,
    pub mode: ToolMode,
}

impl ToolSelection {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// An immutable view over the registry, filtered for one assistant.
///
/// Auto-eligible tools are those named `<namespace>_*` plus any the user
/// enabled explicitly.
pub struct ToolCatalog {
    registry: Arc<ToolRegistry>,
    prefix: String,
    enabled: BTreeSet<String>,
}

impl ToolCatalog {
    pub fn new(registry: Arc<ToolRegistry>, namespace: &str) -> Self {
        Self {
            registry,
            prefix: format!("{namespace}_"),
            enabled: BTreeSet::new(),
        }
    }

    /// Make tools outside the namespace eligible as well.
    pub fn with_enabled_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn is_eligible(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) || self.enabled.contains(name)
    }

    /// Every auto-eligible tool, in registration order.
    pub fn eligible(&self) -> Vec<ToolDescriptor> {
        self.registry
            .descriptors()
            .into_iter()
            .filter(|d| self.is_eligible(&d.name))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    /// Pick the tools for the next request.
    ///
    /// Pops at most one explicit reference off `pending`. A reference that
    /// names a registered tool restricts the request to that tool and makes
    /// calling it required; otherwise the model chooses freely among the
    /// eligible tools.
    pub fn select(&self, pending: &mut VecDeque<String>) -> ToolSelection {
        if let Some(reference) = pending.pop_front() {
            match self.registry.get(&reference) {
                Some(tool) => {
                    debug!(tool = %reference, remaining = pending.len(), "Forcing referenced tool");
                    return ToolSelection {
                        tools: vec![tool.descriptor()],
                        mode: ToolMode::Required,
                    };
                }
                None => warn!(tool = %reference, "Referenced tool is not registered, ignoring"),
            }
        }

        ToolSelection {
            tools: self.eligible(),
            mode: ToolMode::Auto,
        }
    }
}
