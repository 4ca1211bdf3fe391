//! Error types for the session engine.
//!
//! `SessionError` is the user-facing taxonomy. Transient variants are
//! absorbed by the controller (they only flip `is_offline`); terminal
//! variants become the single current error message.

use thiserror::Error;

/// Wire-level failures while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Unexpected frame: expected {expected}")]
    UnexpectedFrame { expected: &'static str },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Directory lookup failed or the room no longer exists.
    #[error("The collaboration room is unavailable: {0}")]
    RoomUnavailable(String),

    /// The transport handshake could not be completed.
    #[error("Could not connect to the collaboration server: {0}")]
    ConnectFailed(String),

    #[error("The room owner declined your request to join")]
    JoinDenied,

    #[error("The room owner is no longer available")]
    OwnerUnavailable,

    #[error("You were removed from the room by its owner")]
    Kicked,

    #[error("Connection to the collaboration server was lost")]
    TransportLost,

    #[error("Could not reconnect after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("A collaboration session is already active")]
    AlreadyActive,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Errors that end the session and must be cleared by the user.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RoomUnavailable(_)
                | Self::ConnectFailed(_)
                | Self::JoinDenied
                | Self::OwnerUnavailable
                | Self::Kicked
                | Self::Exhausted { .. }
        )
    }

    /// Errors the reconnect supervisor is allowed to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::TransportLost)
    }
}
