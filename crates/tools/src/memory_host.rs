//! In-memory project host.
//!
//! Holds a fixed project snapshot and answers every build with a scripted
//! exit code and diagnostics. Used for embedding and for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use keilpilot_core::error::ToolError;
use keilpilot_core::event::EventFeed;
use tracing::debug;

use crate::project::{
    BuildEvent, BuildRequest, ProjectHost, ProjectSnapshot, RawDiagnostic,
};

/// Scripted result of every build started on an [`InMemoryProjectHost`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedBuild {
    pub exit_code: i32,
    pub diagnostics: Vec<RawDiagnostic>,
    /// `None` means the build never finishes.
    pub finish_after: Option<Duration>,
    pub log_file: Option<String>,
}

pub struct InMemoryProjectHost {
    project: Option<ProjectSnapshot>,
    feed: EventFeed<BuildEvent>,
    build: ScriptedBuild,
    triggered: Mutex<Vec<BuildRequest>>,
}

impl InMemoryProjectHost {
    pub fn new(project: Option<ProjectSnapshot>, feed: EventFeed<BuildEvent>) -> Self {
        Self {
            project,
            feed,
            build: ScriptedBuild {
                finish_after: Some(Duration::ZERO),
                ..ScriptedBuild::default()
            },
            triggered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_build(mut self, build: ScriptedBuild) -> Self {
        self.build = build;
        self
    }

    /// Every build request received so far.
    pub fn triggered(&self) -> Vec<BuildRequest> {
        self.triggered
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProjectHost for InMemoryProjectHost {
    fn active_project(&self) -> Option<ProjectSnapshot> {
        self.project.clone()
    }

    fn trigger_build(&self, request: &BuildRequest) -> Result<(), ToolError> {
        if let Ok(mut triggered) = self.triggered.lock() {
            triggered.push(request.clone());
        }

        let event = BuildEvent::new(request.key(), self.build.exit_code);
        match self.build.finish_after {
            None => debug!(build_target = %request.target, "Scripted build never finishes"),
            // Completes before trigger_build returns
            Some(delay) if delay.is_zero() => self.feed.publish(event),
            Some(delay) => {
                let feed = self.feed.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    feed.publish(event);
                });
            }
        }
        Ok(())
    }

    async fn diagnostics(&self, _project_id: &str, _target: &str) -> Vec<RawDiagnostic> {
        self.build.diagnostics.clone()
    }

    fn log_file(&self, _project_id: &str, _target: &str) -> Option<String> {
        self.build.log_file.clone()
    }
}
