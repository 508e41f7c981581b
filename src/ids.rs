//! Conversation and message identifiers
//!
//! Message ids are one of three kinds:
//! - `Internal`: minted locally for system/echo messages, never acknowledged
//! - `Incomplete`: minted locally for a response placeholder while it streams
//! - `External`: assigned by the backend; the only stable identity
//!
//! Local counters are scoped per conversation and per kind.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Backend conversation identifier; empty means "not yet created"
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Id for a conversation the backend has not created yet
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            f.write_str(&self.0)
        } else {
            f.write_str("<unassigned>")
        }
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageIdKind {
    Internal,
    External,
    Incomplete,
}

/// Composite message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub conversation_id: ConversationId,
    pub fragment_id: String,
    pub kind: MessageIdKind,
}

impl MessageId {
    pub fn external(conversation_id: ConversationId, fragment_id: impl Into<String>) -> Self {
        Self {
            conversation_id,
            fragment_id: fragment_id.into(),
            kind: MessageIdKind::External,
        }
    }

    fn local(conversation_id: ConversationId, kind: MessageIdKind, counter: u64) -> Self {
        let prefix = match kind {
            MessageIdKind::Internal => "internal",
            MessageIdKind::Incomplete => "incomplete",
            MessageIdKind::External => "external",
        };
        Self {
            conversation_id,
            fragment_id: format!("{prefix}-{counter}"),
            kind,
        }
    }

    pub fn is_external(&self) -> bool {
        self.kind == MessageIdKind::External
    }

    pub fn is_incomplete(&self) -> bool {
        self.kind == MessageIdKind::Incomplete
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conversation_id, self.fragment_id)
    }
}

/// Allocates local (internal and incomplete) message ids
#[derive(Debug, Default)]
pub struct IdAllocator {
    counters: Mutex<HashMap<(ConversationId, MessageIdKind), u64>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_internal(&self, conversation_id: &ConversationId) -> MessageId {
        self.next(conversation_id, MessageIdKind::Internal)
    }

    pub fn next_incomplete(&self, conversation_id: &ConversationId) -> MessageId {
        self.next(conversation_id, MessageIdKind::Incomplete)
    }

    fn next(&self, conversation_id: &ConversationId, kind: MessageIdKind) -> MessageId {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry((conversation_id.clone(), kind)).or_insert(0);
        *counter += 1;
        MessageId::local(conversation_id.clone(), kind, *counter)
    }
}
