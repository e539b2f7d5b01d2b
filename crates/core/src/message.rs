//! Message and transcript domain types.
//!
//! A message is an ordered list of parts. The ordered sequence of messages
//! is the transcript, and it is sent verbatim to the model on every request.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user (tool results are also carried under this role)
    User,
    /// The AI assistant
    Assistant,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call id)
    pub call_id: String,

    /// Name of the tool to invoke
    pub tool_name: String,

    /// Input as emitted by the model
    pub input: serde_json::Value,
}

/// One element of a message. Exactly one variant is active per part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolCall(ToolCall),
    ToolResult {
        call_id: String,
        content: Vec<String>,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(call_id: impl Into<String>, content: Vec<String>) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            content,
        }
    }

    /// Short variant name, used for logging and transcript shape checks.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolCall(_) => "tool_call",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self { role, parts }
    }

    /// Create a system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![MessagePart::text(text)])
    }

    /// Create a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::text(text)])
    }

    /// Create an assistant message with a single text part.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![MessagePart::text(text)])
    }

    /// Create the assistant message recording a batch of tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::new(
            Role::Assistant,
            calls.into_iter().map(MessagePart::ToolCall).collect(),
        )
    }

    /// Create a user-role message carrying one tool result.
    pub fn tool_result(call_id: impl Into<String>, content: Vec<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::tool_result(call_id, content)])
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_result(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, MessagePart::ToolResult { .. }))
    }
}
