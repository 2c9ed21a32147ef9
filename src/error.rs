//! Unified error type for the challenge coordination engine.

use serde::Serialize;

/// All failures the engine can surface, from the store up through the router.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
pub enum ChallengeError {
    /// The durable store rejected a read or write.
    #[error("store error: {message}")]
    Store {
        /// Context describing what operation failed.
        message: String,
    },

    /// A referenced entity does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was being looked up.
        message: String,
    },

    /// Inbound frame failed to parse or was missing a required field.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the malformed frame.
        message: String,
    },

    /// A legal FSM precondition failed (wrong status, wrong role, not both
    /// online, insufficient coins, ...). Callers turn this into one of the
    /// typed failure frames rather than the generic `error` frame.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Human-readable reason, sent verbatim to the client.
        message: String,
    },
}

impl ChallengeError {
    /// Wrap a store failure with context.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Build a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Build a protocol error (malformed frame).
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Build a precondition failure with the given reason.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition { message: message.into() }
    }

    /// The reason string, suitable for embedding in a failure frame.
    pub fn reason(&self) -> String {
        match self {
            Self::Store { message }
            | Self::NotFound { message }
            | Self::Protocol { message }
            | Self::Precondition { message } => message.clone(),
        }
    }
}

impl From<sqlx::Error> for ChallengeError {
    fn from(err: sqlx::Error) -> Self {
        Self::store(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChallengeError>;
