//! The conversation loop of KeilPilot.
//!
//! A turn follows a **Request → Dispatch → Request** cycle:
//!
//! 1. **Seed** the transcript with the system prompt and the user prompt
//! 2. **Request** a streamed response from the model with the eligible tools
//! 3. **If tool calls**: run them concurrently, append calls and results, loop back to step 2
//! 4. **If text only**: the turn is done
//!
//! The loop ends when the model answers without calling a tool or the
//! iteration cap is reached.

pub mod catalog;
pub mod dispatcher;
pub mod orchestrator;
pub mod session;

pub use catalog::{ToolCatalog, ToolSelection};
pub use dispatcher::{DispatchedCall, PendingCall, ToolDispatcher};
pub use orchestrator::{ConversationOrchestrator, DEFAULT_MAX_ITERATIONS, TurnReport};
pub use session::Session;

#[cfg(test)]
pub(crate) mod test_helpers;
