//! Error types for cart writes
//!
//! Covers everything a backend call can report back to the coalescer:
//! - Transport failures (request never completed)
//! - Rejections (non-success status from the cart service)
//! - Session expiry (401-equivalent, owned by the auth collaborator)
//! - Undecodable response bodies

/// Cart backend error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    /// Request could not be completed
    #[error("transport failure: {0}")]
    Transport(String),

    /// Cart service answered with a non-success status
    #[error("cart service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Session is no longer valid
    #[error("session expired")]
    Unauthorized,

    /// Response body did not match the expected shape
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl CartError {
    /// Build a rejection error
    #[inline]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Whether the auth collaborator has to take over
    #[inline]
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Whether a fresh user-triggered attempt could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }
}

impl From<serde_json::Error> for CartError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
