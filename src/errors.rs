use thiserror::Error;

/// Top-level application error. All variants carry a human-readable message
/// for display/logging; classification helpers below drive HTTP status
/// mapping in the route layer.
#[allow(dead_code)]
#[derive(Debug, Error)]
pub enum AppError {
    // ── Canvas store errors ──────────────────────────────────────────────────
    #[error("Canvas store operation failed: {message}")]
    CanvasStoreFailed { message: String },

    // ── Oracle (text-generation) errors ──────────────────────────────────────
    #[error("Completion oracle unavailable at {host}")]
    OracleUnavailable { host: String },

    #[error("Completion oracle error: {message}")]
    OracleError { message: String },

    // ── External service errors ──────────────────────────────────────────────
    #[error("Similarity search failed: {message}")]
    VectorSearchFailed { message: String },

    #[error("Commerce backend request failed: {message}")]
    CommerceFailed { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    // ── Flow control ─────────────────────────────────────────────────────────
    /// The client went away mid-stream. A clean termination path, not a fault.
    #[error("Client cancelled the exchange")]
    Cancelled,

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn store(message: impl Into<String>) -> Self {
        AppError::CanvasStoreFailed { message: message.into() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. } | AppError::InvalidToolArguments { .. }
        )
    }

    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(
            self,
            AppError::OracleUnavailable { .. } | AppError::CommerceFailed { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
