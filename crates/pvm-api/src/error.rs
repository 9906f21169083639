//! Error types for pvm-api.

use thiserror::Error;

/// Result type alias for control-plane calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors reported by a control-plane client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Host unreachable, TLS failure, broken connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials rejected, or the session was revoked/expired
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Node, VM or task does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The control plane refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The guest agent did not answer
    #[error("guest agent error: {0}")]
    Agent(String),
}

impl ApiError {
    /// True for errors that come from the network path rather than from the
    /// control plane's own decision.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}
