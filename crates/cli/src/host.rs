//! Project host backed by the config file and shell build commands.
//!
//! Each target carries the command line that builds it (usually a `UV4 -b`
//! invocation). Builds run in the project directory and the exit code is
//! published on the build feed.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use keilpilot_config::ProjectConfig;
use keilpilot_core::error::ToolError;
use keilpilot_core::event::EventFeed;
use keilpilot_tools::{
    BuildEvent, BuildRequest, ProjectHost, ProjectKind, ProjectSnapshot, RawDiagnostic, TargetInfo,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct CommandProjectHost {
    project: Option<ProjectConfig>,
    feed: EventFeed<BuildEvent>,
}

impl CommandProjectHost {
    pub fn new(project: Option<ProjectConfig>, feed: EventFeed<BuildEvent>) -> Self {
        Self { project, feed }
    }

    fn project_for(&self, project_id: &str) -> Option<&ProjectConfig> {
        self.project.as_ref().filter(|p| p.project_id() == project_id)
    }

    fn log_path(&self, project_id: &str, target: &str) -> Option<PathBuf> {
        let project = self.project_for(project_id)?;
        let log = project.target(target)?.log_file.as_ref()?;
        Some(project.path.join(log))
    }
}

fn shell(command_line: &str) -> Command {
    #[cfg(target_os = "windows")]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd
    }
    #[cfg(not(target_os = "windows"))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
}

#[async_trait]
impl ProjectHost for CommandProjectHost {
    fn active_project(&self) -> Option<ProjectSnapshot> {
        let project = self.project.as_ref()?;
        let active = project.active_target();
        let mut source_files: Vec<String> = active
            .iter()
            .flat_map(|t| t.sources.iter())
            .map(|s| s.display().to_string())
            .collect();
        source_files.sort();
        source_files.dedup();

        Some(ProjectSnapshot {
            id: project.project_id().to_string(),
            name: project.name.clone(),
            path: project.path.display().to_string(),
            kind: ProjectKind::from_name(&project.kind),
            active_target: active.map(|t| t.name.clone()),
            targets: project
                .targets
                .iter()
                .map(|t| TargetInfo {
                    name: t.name.clone(),
                    description: t.description.clone(),
                })
                .collect(),
            source_files,
        })
    }

    fn trigger_build(&self, request: &BuildRequest) -> Result<(), ToolError> {
        let not_started = |reason: String| ToolError::ExecutionFailed {
            tool_name: "build".into(),
            reason,
        };
        let project = self
            .project_for(&request.project_id)
            .ok_or_else(|| not_started(format!("project '{}' is not open", request.project_id)))?;
        let target = project
            .target(&request.target)
            .ok_or_else(|| not_started(format!("target '{}' is not configured", request.target)))?;

        let command_line = target.command(request.kind.is_rebuild()).to_string();
        let mut cmd = shell(&command_line);
        cmd.current_dir(&project.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| not_started(format!("failed to run '{command_line}': {e}")))?;
        info!(build_target = %request.target, command = %command_line, "Build process started");

        let key = request.key();
        let feed = self.feed.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!(error = %e, "Waiting for build process failed");
                    -1
                }
            };
            debug!(build_target = %key.target, exit_code, "Build process exited");
            feed.publish(BuildEvent::new(key, exit_code));
        });
        Ok(())
    }

    /// Compiler output is left in the log file; nothing is parsed here.
    async fn diagnostics(&self, _project_id: &str, target: &str) -> Vec<RawDiagnostic> {
        debug!(build_target = %target, "Command host reports no diagnostics");
        Vec::new()
    }

    fn log_file(&self, project_id: &str, target: &str) -> Option<String> {
        self.log_path(project_id, target)
            .map(|p| p.display().to_string())
    }
}
