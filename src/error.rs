//! Error taxonomy for the bridging core.
//!
//! Every failure a caller can observe from the dispatch path maps onto one
//! of these variants. The core never retries internally; callers decide
//! whether to retry, degrade, or report upward.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Append/trim was called for a session id that was never created.
    /// Programmer-error guard; the dispatcher always creates first.
    #[error("unknown session: '{0}'")]
    UnknownSession(String),

    /// No inference permit became available within the configured window.
    /// The system is at capacity; safe to retry after backoff.
    #[error("inference gate at capacity (waited {waited_secs}s)")]
    GateTimeout { waited_secs: u64 },

    /// The transport round trip did not complete before its deadline.
    /// The user turn stays recorded, so a retry continues the conversation.
    #[error("inference timed out after {elapsed_secs}s ({transport})")]
    InferenceTimeout {
        transport: &'static str,
        elapsed_secs: u64,
    },

    /// The inference server or broker could not be reached, or answered
    /// with a non-success status.
    #[error("inference unavailable ({transport}): {detail}")]
    InferenceUnavailable {
        transport: &'static str,
        detail: String,
    },

    /// A reply arrived but could not be decoded into a usable shape.
    #[error("malformed reply ({transport}): {detail}")]
    MalformedReply {
        transport: &'static str,
        detail: String,
    },
}

impl BridgeError {
    /// Whether the caller may reasonably retry after a short backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::GateTimeout { .. }
                | BridgeError::InferenceTimeout { .. }
                | BridgeError::InferenceUnavailable { .. }
        )
    }
}
