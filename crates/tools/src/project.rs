//! Project host: the narrow interface the Keil tools drive.
//!
//! A host knows the active project, can start a build in the background,
//! and reports diagnostics once the build is over. Build completion is not
//! returned from `trigger_build`; it arrives later as a [`BuildEvent`] on
//! the shared feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keilpilot_core::completion::Correlated;
use keilpilot_core::error::ToolError;
use serde::{Deserialize, Serialize};

/// Toolchain family of a Keil project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectKind {
    C51,
    C251,
    #[default]
    #[serde(rename = "ARM")]
    Arm,
}

impl ProjectKind {
    /// Parse a kind name, case-insensitively. Unknown names fall back to ARM.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "C51" => Self::C51,
            "C251" => Self::C251,
            _ => Self::Arm,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C51 => "C51",
            Self::C251 => "C251",
            Self::Arm => "ARM",
        }
    }
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub name: String,
    pub description: String,
}

/// Point-in-time view of the active project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub id: String,
    pub name: String,
    pub path: String,
    pub kind: ProjectKind,
    pub active_target: Option<String>,
    pub targets: Vec<TargetInfo>,
    /// Source files of the active target
    pub source_files: Vec<String>,
}

impl ProjectSnapshot {
    pub fn target(&self, name: &str) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    Build,
    Rebuild,
}

impl BuildKind {
    pub fn from_rebuild(rebuild: bool) -> Self {
        if rebuild { Self::Rebuild } else { Self::Build }
    }

    pub fn is_rebuild(&self) -> bool {
        matches!(self, Self::Rebuild)
    }
}

/// Correlation key of a build: which project, which target, which action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    pub project_id: String,
    pub target: String,
    pub kind: BuildKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub project_id: String,
    pub target: String,
    pub kind: BuildKind,
}

impl BuildRequest {
    pub fn key(&self) -> BuildKey {
        BuildKey {
            project_id: self.project_id.clone(),
            target: self.target.clone(),
            kind: self.kind,
        }
    }
}

/// Published by the host when a build process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEvent {
    pub key: BuildKey,
    pub exit_code: i32,
    pub finished_at: DateTime<Utc>,
}

impl BuildEvent {
    pub fn new(key: BuildKey, exit_code: i32) -> Self {
        Self {
            key,
            exit_code,
            finished_at: Utc::now(),
        }
    }
}

impl Correlated for BuildEvent {
    type Key = BuildKey;

    fn correlation_key(&self) -> &BuildKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A diagnostic as the host reports it. `line` is zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiagnostic {
    pub file: String,
    pub line: u32,
    pub severity: Severity,
    pub message: String,
}

/// A diagnostic as returned to the model. `line` is one-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl From<RawDiagnostic> for Diagnostic {
    fn from(raw: RawDiagnostic) -> Self {
        let (code, message) = split_code(&raw.message);
        Self {
            file: raw.file,
            line: raw.line.saturating_add(1),
            severity: raw.severity,
            code,
            message,
        }
    }
}

/// Split `"C141: syntax error"` into `("C141", "syntax error")`.
/// Messages without a leading `CODE:` keep an empty code.
pub fn split_code(message: &str) -> (String, String) {
    match message.split_once(':') {
        Some((code, rest)) if !code.is_empty() && !code.contains('\n') => {
            (code.to_string(), rest.trim_start().to_string())
        }
        _ => (String::new(), message.to_string()),
    }
}

/// The project model the Keil tools act on.
#[async_trait]
pub trait ProjectHost: Send + Sync {
    /// The currently open project, if any.
    fn active_project(&self) -> Option<ProjectSnapshot>;

    /// Start a build without waiting for it. Completion is published as a
    /// [`BuildEvent`] whose key equals `request.key()`.
    fn trigger_build(&self, request: &BuildRequest) -> Result<(), ToolError>;

    /// Diagnostics of the last build of `target`.
    async fn diagnostics(&self, project_id: &str, target: &str) -> Vec<RawDiagnostic>;

    /// Path of the build log of `target`, if it has one.
    fn log_file(&self, project_id: &str, target: &str) -> Option<String>;
}
