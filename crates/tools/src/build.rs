//! Build tool: compile a Keil project target and report diagnostics.
//!
//! The build runs in the host; this tool only starts it and then waits for
//! the matching completion event through the [`ActionCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keilpilot_core::completion::{ActionCoordinator, ActionOutcome};
use keilpilot_core::error::ToolError;
use keilpilot_core::event::EventFeed;
use keilpilot_core::surface::ActionButton;
use keilpilot_core::tool::{Tool, ToolOutput};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::project::{BuildEvent, BuildKind, BuildRequest, Diagnostic, ProjectHost, Severity};

pub const BUILD_TOOL_SUFFIX: &str = "buildProject";

pub const NO_ACTIVE_PROJECT: &str = "No active Keil project found. Please open a project first.";

/// Timing knobs of the build tool.
#[derive(Debug, Clone, Copy)]
pub struct BuildSettings {
    /// How long a build may run
    pub timeout: Duration,
    /// Pause between completion and reading diagnostics
    pub settle_delay: Duration,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            timeout: keilpilot_core::completion::DEFAULT_ACTION_TIMEOUT,
            settle_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BuildInput {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    rebuild: bool,
}

/// What the tool reports back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub exit_code: i32,
    pub target: String,
    pub errors: Vec<Diagnostic>,
    pub error_count: usize,
    pub warning_count: usize,
    pub log_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BuildResult {
    /// A build that never ran or never finished.
    pub fn failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: -1,
            target: target.into(),
            errors: Vec::new(),
            error_count: 0,
            warning_count: 0,
            log_file: String::new(),
            message: Some(message.into()),
        }
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        let counts = format!(
            "{} {}, {} {}",
            self.error_count,
            plural(self.error_count, "error"),
            self.warning_count,
            plural(self.warning_count, "warning"),
        );
        if self.success {
            format!("Build succeeded for target '{}': {counts}", self.target)
        } else {
            format!(
                "Build failed for target '{}' (exit code {}): {counts}",
                self.target, self.exit_code
            )
        }
    }

    fn into_output(self) -> ToolOutput {
        let json = serde_json::to_string_pretty(&self).unwrap_or_default();
        let mut output = ToolOutput {
            success: self.success,
            content: vec![self.summary(), json],
            actions: Vec::new(),
        };
        if !self.log_file.is_empty() {
            output = output.with_action(ActionButton {
                label: "Open build log".into(),
                command: "open".into(),
                arguments: vec![self.log_file],
            });
        }
        output
    }
}

fn cancelled(target: String) -> BuildResult {
    let err = ToolError::ActionCancelled {
        action: "Build".into(),
    };
    info!(build_target = %target, "{err}");
    BuildResult::failed(target, format!("Build failed: {err}"))
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 { word.to_string() } else { format!("{word}s") }
}

/// Build or rebuild a target of the active project.
pub struct BuildTool {
    name: String,
    host: Arc<dyn ProjectHost>,
    coordinator: ActionCoordinator<BuildEvent>,
    settle_delay: Duration,
}

impl BuildTool {
    pub fn new(
        namespace: &str,
        host: Arc<dyn ProjectHost>,
        feed: EventFeed<BuildEvent>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            name: format!("{namespace}_{BUILD_TOOL_SUFFIX}"),
            host,
            coordinator: ActionCoordinator::new(feed).with_default_timeout(settings.timeout),
            settle_delay: settings.settle_delay,
        }
    }

    async fn build(&self, input: BuildInput, cancel: &CancellationToken) -> BuildResult {
        let Some(project) = self.host.active_project() else {
            warn!(tool = %self.name, "No active project");
            return BuildResult::failed(input.target.unwrap_or_else(|| "unknown".into()), NO_ACTIVE_PROJECT);
        };

        let target = match input.target {
            Some(name) if project.target(&name).is_none() => {
                let available = project.target_names().join(", ");
                return BuildResult::failed(
                    name.clone(),
                    format!("Target '{name}' not found. Available targets: {available}"),
                );
            }
            Some(name) => name,
            None => match project.active_target.clone() {
                Some(active) => active,
                None => {
                    return BuildResult::failed("unknown", "No active target found in the project.");
                }
            },
        };

        let request = BuildRequest {
            project_id: project.id.clone(),
            target: target.clone(),
            kind: BuildKind::from_rebuild(input.rebuild),
        };
        info!(
            tool = %self.name,
            project = %project.name,
            build_target = %target,
            kind = ?request.kind,
            "Starting build"
        );

        // Subscribe first so a fast build cannot finish unobserved
        let pending = self.coordinator.begin(request.key());
        let outcome = match self
            .coordinator
            .run(pending, || self.host.trigger_build(&request), cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return BuildResult::failed(target, format!("Build failed: {e}")),
        };

        let event = match outcome {
            ActionOutcome::Resolved(event) => event,
            ActionOutcome::TimedOut => {
                let err = ToolError::ActionTimedOut {
                    action: "Build".into(),
                    after_secs: self.coordinator.default_timeout().as_secs(),
                };
                warn!(build_target = %target, "{err}");
                return BuildResult::failed(target, format!("Build failed: {err}"));
            }
            ActionOutcome::Cancelled => return cancelled(target),
        };

        info!(build_target = %target, exit_code = event.exit_code, "Build completed");

        // Give the host a moment to publish diagnostics
        let collected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            raw = async {
                tokio::time::sleep(self.settle_delay).await;
                self.host.diagnostics(&project.id, &target).await
            } => Some(raw),
        };
        let Some(raw) = collected else {
            return cancelled(target);
        };

        let errors: Vec<Diagnostic> = raw.into_iter().map(Diagnostic::from).collect();
        let error_count = errors
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        let warning_count = errors.len() - error_count;
        debug!(build_target = %target, error_count, warning_count, "Collected diagnostics");

        BuildResult {
            success: event.exit_code == 0,
            exit_code: event.exit_code,
            log_file: self.host.log_file(&project.id, &target).unwrap_or_default(),
            target,
            errors,
            error_count,
            warning_count,
            message: None,
        }
    }
}

#[async_trait]
impl Tool for BuildTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Build or rebuild a Keil project target. Returns compilation results including errors and warnings with file paths, line numbers, and error codes. Use this tool when: 1) User asks to compile/build/rebuild a Keil project or embedded firmware, 2) User mentions \"build the project\" or \"compile the code\", 3) User wants to check for compilation errors, 4) User asks to verify if the code compiles successfully."
    }

    fn tags(&self) -> &[&str] {
        &["build", "compile", "keil", "embedded", "firmware"]
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "The name of the specific target configuration to build (e.g., \"Debug\", \"Release\"). If omitted, the currently active target will be built."
                },
                "rebuild": {
                    "type": "boolean",
                    "description": "Set to true to perform a clean rebuild (recompile all files), or false for incremental build (compile only changed files). Default: false."
                }
            }
        })
    }

    fn invocation_message(&self, input: &serde_json::Value) -> String {
        let input: BuildInput = serde_json::from_value(input.clone()).unwrap_or_default();
        let action = if input.rebuild { "Rebuilding" } else { "Building" };
        let target = input.target.as_deref().unwrap_or("active target");
        format!("{action} Keil project target: {target}")
    }

    async fn invoke(
        &self,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let input: BuildInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
                tool_name: self.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(self.build(input, &cancel).await.into_output())
    }
}
