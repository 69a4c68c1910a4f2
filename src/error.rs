//! Typed errors for the agent pipeline.
//!
//! Most of the CLI and ingestion code uses `anyhow::Result` directly;
//! this enum exists for the seams the orchestrator and HTTP layer have to
//! branch on — a tool timing out is handled very differently from an
//! embedding dimension mismatch. Each variant carries a stable
//! machine-readable code (see [`AgentError::code`]) used in HTTP error
//! bodies and log lines.

use thiserror::Error;

/// Errors raised by the retrieval, transport, and orchestration layers.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connecting to a tool server failed, or an established connection died.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A tool call did not answer within its deadline. The connection
    /// itself stays up; only this call fails.
    #[error("tool '{tool}' timed out after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    /// No server exposes the requested tool, or the owning server could
    /// not be reached even after a reconnect attempt.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// The embedding provider is disabled, unreachable, or kept failing
    /// after the retry budget was spent.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A vector's length does not match the configured dimensionality.
    /// Always a configuration or provider bug — never retried.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    EmbeddingDimensionMismatch { expected: usize, got: usize },

    /// The chat model call failed after its single retry.
    #[error("model call failed: {0}")]
    ModelCallFailed(String),

    /// The rerank stage failed. Recoverable: callers fall back to the
    /// first-stage ordering.
    #[error("rerank failed: {0}")]
    RerankFailed(String),

    /// The model kept requesting tools past the per-turn iteration cap.
    #[error("too many function calls in chain (max {max_iterations})")]
    LoopLimitExceeded { max_iterations: usize },

    /// Invalid configuration detected past load-time validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying SQLite failure.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl AgentError {
    /// Stable machine-readable code for HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::TransportUnavailable(_) => "transport_unavailable",
            AgentError::ToolTimeout { .. } => "tool_timeout",
            AgentError::ToolUnavailable(_) => "tool_unavailable",
            AgentError::EmbeddingUnavailable(_) => "embedding_unavailable",
            AgentError::EmbeddingDimensionMismatch { .. } => "embedding_dimension_mismatch",
            AgentError::ModelCallFailed(_) => "model_call_failed",
            AgentError::RerankFailed(_) => "rerank_failed",
            AgentError::LoopLimitExceeded { .. } => "loop_limit_exceeded",
            AgentError::Config(_) => "config",
            AgentError::Store(_) => "store",
        }
    }

    /// True when the turn can continue past this error (the orchestrator
    /// degrades instead of failing the whole turn).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AgentError::RerankFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            AgentError::ToolTimeout {
                tool: "fetch".into(),
                timeout_secs: 30
            }
            .code(),
            "tool_timeout"
        );
        assert_eq!(
            AgentError::LoopLimitExceeded { max_iterations: 10 }.code(),
            "loop_limit_exceeded"
        );
    }

    #[test]
    fn test_loop_limit_message_names_the_cap() {
        let err = AgentError::LoopLimitExceeded { max_iterations: 10 };
        assert!(err.to_string().contains("max 10"));
    }

    #[test]
    fn test_only_rerank_is_recoverable() {
        assert!(AgentError::RerankFailed("boom".into()).is_recoverable());
        assert!(!AgentError::ModelCallFailed("boom".into()).is_recoverable());
        assert!(!AgentError::TransportUnavailable("gone".into()).is_recoverable());
    }
}
