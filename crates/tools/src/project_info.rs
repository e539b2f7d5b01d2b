//! Project info tool: describe the active Keil project.

use std::sync::Arc;

use async_trait::async_trait;
use keilpilot_core::error::ToolError;
use keilpilot_core::tool::{Tool, ToolOutput};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::build::NO_ACTIVE_PROJECT;
use crate::project::{ProjectHost, ProjectKind, ProjectSnapshot, TargetInfo};

pub const PROJECT_INFO_TOOL_SUFFIX: &str = "getProjectInfo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_name: String,
    pub project_path: String,
    pub project_type: ProjectKind,
    pub active_target: String,
    pub targets: Vec<TargetInfo>,
    pub source_files: Vec<String>,
}

impl From<ProjectSnapshot> for ProjectInfo {
    fn from(project: ProjectSnapshot) -> Self {
        Self {
            project_name: project.name,
            project_path: project.path,
            project_type: project.kind,
            active_target: project.active_target.unwrap_or_default(),
            targets: project.targets,
            source_files: project.source_files,
        }
    }
}

impl ProjectInfo {
    pub fn summary(&self) -> String {
        let active = if self.active_target.is_empty() {
            "none"
        } else {
            &self.active_target
        };
        format!(
            "Project '{}' ({}): {} target(s), active target {}, {} source file(s)",
            self.project_name,
            self.project_type,
            self.targets.len(),
            active,
            self.source_files.len()
        )
    }
}

pub struct GetProjectInfoTool {
    name: String,
    host: Arc<dyn ProjectHost>,
}

impl GetProjectInfoTool {
    pub fn new(namespace: &str, host: Arc<dyn ProjectHost>) -> Self {
        Self {
            name: format!("{namespace}_{PROJECT_INFO_TOOL_SUFFIX}"),
            host,
        }
    }
}

#[async_trait]
impl Tool for GetProjectInfoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Get detailed information about the current Keil project including project name, type (C51/C251/ARM), active target, all available targets, and source file list. Use this tool when: 1) User asks \"what is the current project\", \"show project info\", or \"list project files\", 2) User wants to know available build targets, 3) User asks about project configuration or structure, 4) You need to understand the project context before building or making changes, 5) User asks about the project type (C51/ARM/C251)."
    }

    fn tags(&self) -> &[&str] {
        &["info", "project", "keil", "structure", "configuration"]
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "description": "No parameters required. Returns information about the currently active Keil project in the workspace."
        })
    }

    fn invocation_message(&self, _input: &serde_json::Value) -> String {
        "Retrieving Keil project information".into()
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let Some(project) = self.host.active_project() else {
            return Ok(ToolOutput::failure(NO_ACTIVE_PROJECT));
        };

        let info = ProjectInfo::from(project);
        debug!(tool = %self.name, project = %info.project_name, "Project info collected");

        let json = serde_json::to_string_pretty(&info).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(ToolOutput::success(vec![info.summary(), json]))
    }
}
