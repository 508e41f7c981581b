//! Events emitted by a workflow

use super::WorkflowState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Piece of streamed response content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentPart {
    Text {
        text: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    FunctionResult {
        call_id: String,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// One increment of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFragment {
    /// Backend id of the message being streamed, once known
    #[serde(default)]
    pub message_id: Option<String>,
    pub parts: Vec<FragmentPart>,
    pub is_last: bool,
}

impl ResponseFragment {
    pub fn text(text: impl Into<String>, is_last: bool) -> Self {
        Self {
            message_id: None,
            parts: vec![FragmentPart::Text { text: text.into() }],
            is_last,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// Server finished the session cleanly
    ServerDisconnected,
    /// Client cancelled or disconnected on purpose
    ClientCanceled,
    /// Discussion handshake failed
    InitializationFailed,
    NetworkError,
    Timeout,
    ServerError,
    Unknown,
}

/// Why a workflow closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    pub kind: CloseKind,
    pub description: String,
}

impl CloseReason {
    pub fn new(kind: CloseKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// A clean, server-initiated close
    pub fn is_graceful(&self) -> bool {
        self.kind == CloseKind::ServerDisconnected
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.description)
    }
}

/// Backend confirmation of a submitted user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeInfo {
    /// Authoritative message id
    pub message_id: String,
    /// Prompt content as echoed (possibly normalized) by the backend
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    ChatResponse(ResponseFragment),
    Close(CloseReason),
    StateChanged(WorkflowState),
    AcknowledgeChat(AcknowledgeInfo),
}
