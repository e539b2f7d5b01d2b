//! Configuration loading, validation, and management for KeilPilot.
//!
//! Loads configuration from `~/.keilpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// System prompt used when no override is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for Keil uVision projects. You can help users with:
- Building and compiling Keil projects
- Getting project information
- Understanding project structure and configuration
- Troubleshooting build errors

Use the available tools to help users accomplish their tasks. Don't ask for confirmation before using tools, just use them when appropriate.";

/// Project kinds understood by the build tools.
pub const PROJECT_KINDS: &[&str] = &["C51", "C251", "ARM"];

/// The root configuration structure.
///
/// Maps directly to `~/.keilpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model to request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// The Keil project the build tools act on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectConfig>,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.2
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("agent", &self.agent)
            .field("project", &self.project)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum model requests per turn before the turn is aborted
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// How long a build may run before the build tool gives up
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    /// Delay after a build completes before diagnostics are collected
    #[serde(default = "default_diagnostics_settle_ms")]
    pub diagnostics_settle_ms: u64,

    /// Name prefix of the tools that are eligible automatically
    #[serde(default = "default_tool_namespace")]
    pub tool_namespace: String,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_tool_iterations() -> u32 {
    25
}
fn default_build_timeout_secs() -> u64 {
    300
}
fn default_diagnostics_settle_ms() -> u64 {
    500
}
fn default_tool_namespace() -> String {
    "keilpilot".into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            build_timeout_secs: default_build_timeout_secs(),
            diagnostics_settle_ms: default_diagnostics_settle_ms(),
            tool_namespace: default_tool_namespace(),
            system_prompt: None,
        }
    }
}

impl AgentSettings {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Stable identifier used to correlate build completions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    /// Project directory (build commands run here)
    pub path: PathBuf,

    /// One of C51, C251, ARM
    #[serde(default = "default_project_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_target: Option<String>,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_project_kind() -> String {
    "ARM".into()
}

impl ProjectConfig {
    /// The configured id, or the project name when none is set.
    pub fn project_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// The configured active target, or the first target.
    pub fn active_target(&self) -> Option<&TargetConfig> {
        match &self.active_target {
            Some(name) => self.target(name),
            None => self.targets.first(),
        }
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Shell command for an incremental build
    pub build_command: String,

    /// Shell command for a clean rebuild (defaults to `build_command`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuild_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Source files, relative to the project directory
    #[serde(default)]
    pub sources: Vec<PathBuf>,
}

impl TargetConfig {
    pub fn command(&self, rebuild: bool) -> &str {
        match (&self.rebuild_command, rebuild) {
            (Some(cmd), true) => cmd,
            _ => &self.build_command,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.keilpilot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `KEILPILOT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `KEILPILOT_API_URL`
    /// - `KEILPILOT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let config = Self::load_from(&config_path)?;
        Ok(config.with_env_overrides())
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = std::env::var("KEILPILOT_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        {
            self.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("KEILPILOT_API_URL") {
            self.api_url = url;
        }

        if let Ok(model) = std::env::var("KEILPILOT_MODEL") {
            self.model = model;
        }

        self
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".keilpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be > 0".into(),
            ));
        }

        if self.agent.build_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.build_timeout_secs must be > 0".into(),
            ));
        }

        if let Some(project) = &self.project {
            if !PROJECT_KINDS.contains(&project.kind.to_ascii_uppercase().as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "project.kind must be one of {}, got '{}'",
                    PROJECT_KINDS.join(", "),
                    project.kind
                )));
            }

            if let Some(active) = &project.active_target
                && project.target(active).is_none()
            {
                return Err(ConfigError::ValidationError(format!(
                    "project.active_target '{active}' is not one of the configured targets"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string, including an example project.
    pub fn default_toml() -> String {
        let config = Self {
            project: Some(ProjectConfig {
                id: None,
                name: "Blinky".into(),
                path: PathBuf::from("."),
                kind: default_project_kind(),
                active_target: Some("Debug".into()),
                targets: vec![TargetConfig {
                    name: "Debug".into(),
                    description: "Debug build".into(),
                    build_command: "UV4 -b Blinky.uvprojx -t Debug -j0 -o build.log".into(),
                    rebuild_command: Some("UV4 -r Blinky.uvprojx -t Debug -j0 -o build.log".into()),
                    log_file: Some(PathBuf::from("build.log")),
                    sources: vec![PathBuf::from("src/main.c")],
                }],
            }),
            ..Self::default()
        };
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            agent: AgentSettings::default(),
            project: None,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_tool_iterations, 25);
        assert_eq!(config.agent.build_timeout_secs, 300);
        assert_eq!(config.agent.tool_namespace, "keilpilot");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.agent.build_timeout_secs, config.agent.build_timeout_secs);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iteration_cap_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_tool_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert!(config.project.is_none());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o"));
        assert!(toml_str.contains("[[project.targets]]"));
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn project_config_parsing() {
        let toml_str = r#"
model = "gpt-4o-mini"

[agent]
build_timeout_secs = 120

[project]
name = "Blinky"
path = "/work/blinky"
kind = "C51"
active_target = "Release"

[[project.targets]]
name = "Debug"
build_command = "make debug"

[[project.targets]]
name = "Release"
description = "Optimised"
build_command = "make release"
rebuild_command = "make clean release"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.build_timeout_secs, 120);
        assert_eq!(config.agent.max_tool_iterations, 25);

        let project = config.project.unwrap();
        assert_eq!(project.project_id(), "Blinky");
        assert_eq!(project.active_target().unwrap().name, "Release");
        let release = project.target("Release").unwrap();
        assert_eq!(release.command(true), "make clean release");
        assert_eq!(project.target("Debug").unwrap().command(true), "make debug");
    }

    #[test]
    fn unknown_active_target_rejected() {
        let toml_str = r#"
[project]
name = "Blinky"
path = "."
active_target = "Nope"

[[project.targets]]
name = "Debug"
build_command = "make"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn unknown_project_kind_rejected() {
        let toml_str = r#"
[project]
name = "Blinky"
path = "."
kind = "AVR"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = \"local-model\"\ntemperature = 0.5").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model, "local-model");
        assert!((config.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn load_from_malformed_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = [unterminated").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn system_prompt_override() {
        let mut settings = AgentSettings::default();
        assert!(settings.system_prompt().contains("Keil uVision"));
        settings.system_prompt = Some("custom".into());
        assert_eq!(settings.system_prompt(), "custom");
    }
}
