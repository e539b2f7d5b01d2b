//! Error types for the KeilPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all KeilPilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent loop errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool input for {tool_name}: {reason}")]
    InvalidInput { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("{action} timeout after {}", humanize(.after_secs))]
    ActionTimedOut { action: String, after_secs: u64 },

    #[error("{action} cancelled by user")]
    ActionCancelled { action: String },
}

/// Errors that abort a whole user turn.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Language model unavailable: {0}")]
    ModelUnavailable(#[source] ProviderError),

    #[error("Model response stream failed: {0}")]
    Stream(#[source] ProviderError),

    #[error("Exceeded {0} tool iterations without a final answer")]
    TooManyToolIterations(u32),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

fn humanize(secs: &u64) -> String {
    match *secs {
        60 => "1 minute".into(),
        s if s > 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".into(),
        s => format!("{s} seconds"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn action_timeout_uses_minutes_when_whole() {
        let err = ToolError::ActionTimedOut {
            action: "Build".into(),
            after_secs: 300,
        };
        assert_eq!(err.to_string(), "Build timeout after 5 minutes");

        let err = ToolError::ActionTimedOut {
            action: "Build".into(),
            after_secs: 90,
        };
        assert_eq!(err.to_string(), "Build timeout after 90 seconds");
    }

    #[test]
    fn action_cancelled_message() {
        let err = ToolError::ActionCancelled {
            action: "Build".into(),
        };
        assert_eq!(err.to_string(), "Build cancelled by user");
    }

    #[test]
    fn iteration_cap_error_names_the_limit() {
        let err = Error::from(AgentError::TooManyToolIterations(25));
        assert!(err.to_string().contains("25"));
    }
}
