//! Error types for the chat session core

use crate::ids::{ConversationId, MessageId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while orchestrating a conversation
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid conversation id: {0:?}")]
    InvalidConversation(ConversationId),
    #[error("Conversation not loaded: {0}")]
    ConversationNotLoaded(ConversationId),
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Malformed message {id}: {reason}")]
    MalformedMessage { id: MessageId, reason: String },
    #[error("Unsupported message role: {0}")]
    UnsupportedRole(String),
    #[error("Failed to serialize attached context: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Request was cancelled")]
    Cancelled,
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Main execution context is no longer running")]
    MainContextClosed,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Backend error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidRequest, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Server, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unknown, message)
    }
}

/// Error classification for backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Transport unavailable or dropped
    Network,
    /// Credentials rejected
    Auth,
    /// Conversation or message does not exist on the backend
    NotFound,
    /// Request rejected as malformed
    InvalidRequest,
    /// Backend-side failure
    Server,
    Unknown,
}

impl BackendErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Server)
    }
}

/// User-facing error payload for `ConversationErrorOccurred`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message
    pub message: String,
    /// Raw diagnostic detail (e.g. the workflow close reason)
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<&SessionError> for ErrorInfo {
    fn from(error: &SessionError) -> Self {
        ErrorInfo::new(error.to_string())
    }
}
