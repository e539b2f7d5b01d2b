//! Model endpoint trait: the abstraction over LLM backends.
//!
//! An endpoint takes the transcript plus the tools eligible for this request
//! and returns a stream of response parts: text, interleaved with tool-call
//! requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool input
    pub parameters: serde_json::Value,
}

/// Whether the model may decide freely or must call a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    #[default]
    Auto,
    Required,
}

/// One request to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Full transcript
    pub messages: Vec<Message>,

    /// Tools eligible for this request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub tool_mode: ToolMode,
}

/// A single streamed element of a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePart {
    Text { text: String },
    ToolCall(ToolCall),
}

/// Stream of response parts. The stream ends when the sender is dropped.
pub type ResponseStream = mpsc::Receiver<std::result::Result<ResponsePart, ProviderError>>;

/// The core model endpoint trait.
///
/// The orchestrator calls `send()` without knowing which backend is used.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// A human-readable name for this endpoint.
    fn name(&self) -> &str;

    /// Send a request and get a stream of response parts.
    ///
    /// An `Err` here means no response could be started at all. Firing
    /// `cancel` must stop the stream promptly.
    async fn send(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ResponseStream, ProviderError>;
}
