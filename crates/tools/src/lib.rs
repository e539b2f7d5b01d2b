//! Keil project tools for KeilPilot.
//!
//! Tools give the model a handle on the open Keil uVision project:
//! build or rebuild a target and wait for the result, and inspect the
//! project structure. Both act through a [`ProjectHost`].

pub mod build;
pub mod memory_host;
pub mod project;
pub mod project_info;

use std::sync::Arc;

use keilpilot_core::event::EventFeed;
use keilpilot_core::tool::ToolRegistry;
use tracing::info;

pub use build::{BuildResult, BuildSettings, BuildTool};
pub use memory_host::{InMemoryProjectHost, ScriptedBuild};
pub use project::{
    BuildEvent, BuildKey, BuildKind, BuildRequest, Diagnostic, ProjectHost, ProjectKind,
    ProjectSnapshot, RawDiagnostic, Severity, TargetInfo,
};
pub use project_info::{GetProjectInfoTool, ProjectInfo};

/// Settings shared by the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Prefix of every tool name (`<namespace>_buildProject`)
    pub namespace: String,
    pub build: BuildSettings,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            namespace: "keilpilot".into(),
            build: BuildSettings::default(),
        }
    }
}

/// Create a registry with both Keil tools bound to `host`.
///
/// Build completions are expected on `feed`.
pub fn default_registry(
    host: Arc<dyn ProjectHost>,
    feed: EventFeed<BuildEvent>,
    settings: &ToolSettings,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let build = BuildTool::new(&settings.namespace, host.clone(), feed, settings.build);
    info!(tool = %keilpilot_core::tool::Tool::name(&build), "Registered tool");
    registry.register(Arc::new(build));

    let project_info = GetProjectInfoTool::new(&settings.namespace, host);
    info!(tool = %keilpilot_core::tool::Tool::name(&project_info), "Registered tool");
    registry.register(Arc::new(project_info));

    registry
}
