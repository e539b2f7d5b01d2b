//! Per-turn conversation state.

use std::collections::VecDeque;

use keilpilot_core::message::{Message, MessagePart, Role};
use uuid::Uuid;

/// The transcript of the current turn plus the explicit tool references
/// not yet consumed. History is append-only between resets.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    history: Vec<Message>,
    pending_tool_refs: VecDeque<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
            pending_tool_refs: VecDeque::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start a new turn: forget the previous transcript and queue `tool_refs`.
    pub fn reset(&mut self, tool_refs: impl IntoIterator<Item = String>) {
        self.id = Uuid::new_v4();
        self.history.clear();
        self.pending_tool_refs = tool_refs.into_iter().collect();
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    pub fn pending_tool_refs_mut(&mut self) -> &mut VecDeque<String> {
        &mut self.pending_tool_refs
    }

    /// Parts of the most recent message that carries a tool result.
    pub fn last_tool_result(&self) -> &[MessagePart] {
        self.history
            .iter()
            .rev()
            .find(|m| m.has_tool_result())
            .map(|m| m.parts.as_slice())
            .unwrap_or(&[])
    }

    /// The first text part of any user message.
    pub fn first_user_text(&self) -> Option<&str> {
        self.history
            .iter()
            .filter(|m| m.role == Role::User)
            .flat_map(|m| m.parts.iter())
            .find_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
    }

    /// Part kinds of every message, for comparing transcript shapes.
    pub fn shape(&self) -> Vec<(Role, Vec<&'static str>)> {
        self.history
            .iter()
            .map(|m| (m.role, m.parts.iter().map(MessagePart::kind).collect()))
            .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
