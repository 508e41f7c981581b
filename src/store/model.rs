//! Conversation and message types held by the store

use crate::error::SessionError;
use crate::ids::{ConversationId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(SessionError::UnsupportedRole(raw.to_string())),
        }
    }
}

/// One attached context item (selection, file, log excerpt, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl ContextEntry {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            payload,
        }
    }
}

/// Outcome of a function call made during a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionOutcome {
    pub output: Value,
    pub is_error: bool,
}

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// The user's prompt text
    Prompt { text: String },
    /// Assistant response text
    Response { text: String },
    /// Tool/function call issued while responding
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Value,
        #[serde(default)]
        outcome: Option<FunctionOutcome>,
    },
    /// Locally surfaced error
    Error { message: String },
}

impl Block {
    pub fn prompt(text: impl Into<String>) -> Self {
        Block::Prompt { text: text.into() }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Block::Response { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Block::Error {
            message: message.into(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Block::Prompt { text } | Block::Response { text } => Some(text),
            Block::Error { message } => Some(message),
            Block::FunctionCall { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub is_complete: bool,
    /// Position in the conversation when last fixed
    pub message_index: usize,
    #[serde(default)]
    pub context: Vec<ContextEntry>,
    pub blocks: Vec<Block>,
}

impl Message {
    /// Completed user message with a single prompt block
    pub fn user(id: MessageId, text: impl Into<String>, context: Vec<ContextEntry>) -> Self {
        Self {
            id,
            role: Role::User,
            timestamp: Utc::now(),
            is_complete: true,
            message_index: 0,
            context,
            blocks: vec![Block::prompt(text)],
        }
    }

    /// Empty assistant message awaiting streamed content
    pub fn placeholder(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            timestamp: Utc::now(),
            is_complete: false,
            message_index: 0,
            context: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Completed system message carrying an error
    pub fn error(id: MessageId, message: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::System,
            timestamp: Utc::now(),
            is_complete: true,
            message_index: 0,
            context: Vec::new(),
            blocks: vec![Block::error(message)],
        }
    }

    /// Concatenated text of all text-bearing blocks
    pub fn text(&self) -> String {
        self.blocks.iter().filter_map(Block::text).collect()
    }
}

/// A command run on the user's behalf, kept for re-hydration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecution {
    pub message_id: Option<MessageId>,
    pub command: String,
    pub output: String,
    pub succeeded: bool,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub is_favorite: bool,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub command_history: Vec<CommandExecution>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            title: String::new(),
            is_favorite: false,
            messages: Vec::new(),
            command_history: Vec::new(),
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn incomplete_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_complete).count()
    }

    /// Nearest user message at or before `id`
    pub fn preceding_user_message(&self, id: &MessageId) -> Option<&Message> {
        let end = self.position(id)?;
        self.messages[..=end]
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(n: &str) -> MessageId {
        MessageId::external(ConversationId::new("c"), n)
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(" Assistant ".parse::<Role>().unwrap(), Role::Assistant);
        assert!(matches!(
            "tool".parse::<Role>(),
            Err(SessionError::UnsupportedRole(r)) if r == "tool"
        ));
    }

    #[test]
    fn test_preceding_user_message_scans_backward() {
        let mut conv = Conversation::new(ConversationId::new("c"));
        conv.messages.push(Message::user(ext("u1"), "first", vec![]));
        conv.messages.push(Message::placeholder(ext("a1")));
        conv.messages.push(Message::user(ext("u2"), "second", vec![]));
        conv.messages.push(Message::placeholder(ext("a2")));

        assert_eq!(conv.preceding_user_message(&ext("a1")).unwrap().id, ext("u1"));
        assert_eq!(conv.preceding_user_message(&ext("a2")).unwrap().id, ext("u2"));
        assert_eq!(conv.preceding_user_message(&ext("u2")).unwrap().id, ext("u2"));
        assert!(conv.preceding_user_message(&ext("missing")).is_none());
    }

    #[test]
    fn test_message_text_joins_blocks() {
        let mut msg = Message::placeholder(ext("a"));
        msg.blocks.push(Block::response("Hi"));
        msg.blocks.push(Block::FunctionCall {
            call_id: "1".into(),
            name: "noop".into(),
            arguments: Value::Null,
            outcome: None,
        });
        msg.blocks.push(Block::response(" there"));
        assert_eq!(msg.text(), "Hi there");
    }
}
