//! Subcommand implementations and the wiring they share.

pub mod chat;
pub mod config_cmd;
pub mod tools;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keilpilot_config::AppConfig;
use keilpilot_core::event::EventFeed;
use keilpilot_core::tool::ToolRegistry;
use keilpilot_tools::{BuildEvent, BuildSettings, ToolSettings};

use crate::host::CommandProjectHost;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_from(path).map(AppConfig::with_env_overrides),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

pub fn tool_settings(config: &AppConfig) -> ToolSettings {
    ToolSettings {
        namespace: config.agent.tool_namespace.clone(),
        build: BuildSettings {
            timeout: Duration::from_secs(config.agent.build_timeout_secs),
            settle_delay: Duration::from_millis(config.agent.diagnostics_settle_ms),
        },
    }
}

/// Register the Keil tools against the configured project.
pub fn build_registry(config: &AppConfig, feed: EventFeed<BuildEvent>) -> ToolRegistry {
    let host = Arc::new(CommandProjectHost::new(config.project.clone(), feed.clone()));
    keilpilot_tools::default_registry(host, feed, &tool_settings(config))
}
