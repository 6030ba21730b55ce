//! Error types for the InvokeLens SDK.
//!
//! Only [`Error`] reaches the embedding application, and only from
//! construction and lifecycle calls. [`DeliveryError`] is logged and counted
//! by the pipeline, never returned to an instrumented caller.

use thiserror::Error;

/// The top-level error type for SDK construction and lifecycle operations.
///
/// Telemetry delivery never produces one of these for the instrumented
/// caller: delivery problems stay inside [`DeliveryError`].
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Builder / argument validation ---
    #[error("Validation error: {0}")]
    Validation(String),

    // --- Event model ---
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    // --- Lifecycle ---
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// An event failed validation while being built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("agent_id must not be empty")]
    EmptyAgentId,

    #[error("estimated cost must be a finite non-negative number, got {0}")]
    InvalidCost(f64),
}

/// Why a batch could not be delivered.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Ingest rejected batch (status: {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Failed to serialize batch: {0}")]
    Serialization(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("{failed}/{total} bus entries failed")]
    PartialPublish { failed: usize, total: usize },
}

impl DeliveryError {
    /// HTTP status code, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the endpoint answered with a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(s) if (400..500).contains(&s))
    }
}
