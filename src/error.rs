//! Error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the inbox, account and storage layers.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Attempt to view a conversation with oneself.
    #[error("Invalid conversation: cannot open a conversation with yourself")]
    InvalidConversation,

    /// Attempt to send a message to oneself.
    #[error("Cannot send a message to yourself")]
    SelfMessage,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    /// Only the receiver may mark a message as read.
    #[error("Only the receiver can mark this message as read")]
    NotRecipient,

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Missing, malformed, forged or expired token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }

    /// Stable tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UserNotFound(_) => "user_not_found",
            Error::InvalidConversation => "invalid_conversation",
            Error::SelfMessage => "self_message",
            Error::Validation(_) => "validation",
            Error::MessageNotFound(_) => "message_not_found",
            Error::NotRecipient => "not_recipient",
            Error::UsernameTaken(_) => "username_taken",
            Error::InvalidCredentials => "invalid_credentials",
            Error::Unauthorized(_) => "unauthorized",
            Error::Storage(_) | Error::Crypto(_) => "internal",
        }
    }

    /// HTTP-style status a transport can translate this error into.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UserNotFound(_) | Error::MessageNotFound(_) => 404,
            Error::InvalidConversation | Error::SelfMessage | Error::Validation(_) => 400,
            Error::NotRecipient => 403,
            Error::UsernameTaken(_) => 409,
            Error::InvalidCredentials | Error::Unauthorized(_) => 401,
            Error::Storage(_) | Error::Crypto(_) => 500,
        }
    }

    /// Deterministic input errors, safe to show to the caller verbatim.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

/// Result type alias for market-chat operations.
pub type Result<T> = std::result::Result<T, Error>;
