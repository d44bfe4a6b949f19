//! Engine error taxonomy
//!
//! Every failure inside the engine falls into one of four classes, and the
//! propagation policy is uniform: adapters and the reconciler never let an
//! error escape their public entry points. Failures become a tracing event
//! plus a fallback ("no update this cycle"); the engine never crashes the
//! host application. Capacity eviction is intentionally NOT an error.

use thiserror::Error;

/// Failure classes of the alert engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeouts, connection drops, non-success HTTP status. Always retried
    /// per the owning adapter's policy, never fatal.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Missing or rejected credential. The affected adapter pauses until a
    /// token becomes available again; other adapters keep running.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Malformed payload. The offending record/frame/line is dropped; the
    /// rest of the batch is unaffected.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// Snapshot or read-state write failure. In-memory state is kept and the
    /// write is retried on the next reconciliation.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Whether the failure is expected to clear on its own with a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientNetwork(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::Decode(err.to_string())
        } else {
            // Timeouts, connect failures, request build errors: all retryable.
            EngineError::TransientNetwork(err.to_string())
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}
