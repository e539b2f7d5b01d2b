//! Shared test helpers: a scripted model and a few trivial tools.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use keilpilot_core::error::{ProviderError, ToolError};
use keilpilot_core::message::ToolCall;
use keilpilot_core::provider::{ModelEndpoint, ModelRequest, ResponsePart, ResponseStream};
use keilpilot_core::tool::{Tool, ToolOutput};
use tokio_util::sync::CancellationToken;

/// One scripted model response.
pub enum Reply {
    /// Stream these parts, then end.
    Parts(Vec<ResponsePart>),
    /// Fail to start the response.
    Fail(ProviderError),
    /// Stream these parts, then a stream error.
    Broken(Vec<ResponsePart>, ProviderError),
    /// Never finish until cancelled.
    Hang,
}

pub fn text(text: &str) -> ResponsePart {
    ResponsePart::Text { text: text.into() }
}

pub fn tool_call(call_id: &str, tool_name: &str, input: serde_json::Value) -> ResponsePart {
    ResponsePart::ToolCall(ToolCall {
        call_id: call_id.into(),
        tool_name: tool_name.into(),
        input,
    })
}

/// A model that returns scripted replies in order and records requests.
///
/// Panics if more requests are made than replies provided.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedModel: no reply for request #{call}"));

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        match reply {
            Reply::Fail(e) => return Err(e),
            Reply::Parts(parts) => {
                for part in parts {
                    tx.try_send(Ok(part)).unwrap();
                }
            }
            Reply::Broken(parts, e) => {
                for part in parts {
                    tx.try_send(Ok(part)).unwrap();
                }
                tx.try_send(Err(e)).unwrap();
            }
            Reply::Hang => {
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    drop(tx);
                });
            }
        }
        Ok(rx)
    }
}

/// Echoes its own name back. Accepts any input.
pub struct NamedTool {
    name: String,
}

impl NamedTool {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for NamedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns its name"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::success(vec![self.name.clone()]))
    }
}

/// Sleeps `ms` milliseconds, then returns `label`.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "keilpilot_sleep"
    }

    fn description(&self) -> &str {
        "Waits, then answers"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ms": { "type": "integer" },
                "label": { "type": "string" }
            },
            "required": ["ms", "label"]
        })
    }

    async fn invoke(
        &self,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let ms = input["ms"].as_u64().unwrap_or(0);
        let label = input["label"].as_str().unwrap_or_default().to_string();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::ActionCancelled { action: "Sleep".into() }),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(ToolOutput::success(vec![label])),
        }
    }
}

/// Sleeps for a fixed time without looking at its cancel token.
pub struct StubbornTool {
    name: String,
    duration: Duration,
}

impl StubbornTool {
    pub fn new(name: &str, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

#[async_trait]
impl Tool for StubbornTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Takes its time"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.duration).await;
        Ok(ToolOutput::success(vec![self.name.clone()]))
    }
}

/// Returns several content items and an action button.
pub struct ReportTool;

#[async_trait]
impl Tool for ReportTool {
    fn name(&self) -> &str {
        "keilpilot_report"
    }

    fn description(&self) -> &str {
        "Returns a summary, details and a button"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        Ok(
            ToolOutput::success(vec!["summary".into(), "detail 1".into(), "detail 2".into()])
                .with_action(keilpilot_core::surface::ActionButton {
                    label: "Open build log".into(),
                    command: "open".into(),
                    arguments: vec!["build.log".into()],
                }),
        )
    }
}
