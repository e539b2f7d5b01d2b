//! # KeilPilot Core
//!
//! Domain types, traits, and error definitions for the KeilPilot assistant.
//! This crate defines the domain model that all other crates implement
//! against, plus the one runtime primitive everybody shares: the action
//! completion coordinator.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model endpoint, tool, output surface) is a
//! trait here. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted stubs
//! - Clean dependency graph (all crates depend inward on core)

pub mod completion;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod surface;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use completion::{ActionCoordinator, ActionOutcome, Correlated, PendingAction, DEFAULT_ACTION_TIMEOUT};
pub use error::{AgentError, Error, ProviderError, Result, ToolError};
pub use event::EventFeed;
pub use message::{Message, MessagePart, Role, ToolCall};
pub use provider::{ModelEndpoint, ModelRequest, ResponsePart, ResponseStream, ToolDefinition, ToolMode};
pub use surface::{ActionButton, OutputSurface, RecordingSurface, SurfaceWrite};
pub use tool::{Tool, ToolDescriptor, ToolOutput, ToolRegistry};
pub use tokio_util::sync::CancellationToken;
