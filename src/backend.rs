//! Trait abstractions for the external collaborators
//!
//! The backend, credential source, relay transport and function caller are
//! implemented elsewhere; these traits let the orchestrator run against
//! mocks in tests.

use crate::error::BackendError;
use crate::ids::{ConversationId, MessageId};
use crate::store::ContextEntry;
use crate::workflow::ChatWorkflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Opaque credentials passed to every backend call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsContext {
    pub access_token: String,
    pub organization_id: Option<String>,
}

/// Conversation list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub is_favorite: bool,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Function call as recorded in backend history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryFunctionCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// Message as recorded in backend history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    /// Raw role string; converted on load
    pub role: String,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Vec<ContextEntry>,
    #[serde(default)]
    pub function_calls: Vec<HistoryFunctionCall>,
}

/// Full conversation as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub is_favorite: bool,
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub message_id: MessageId,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub comment: String,
}

/// Executes tool calls the backend asks the client to run
#[async_trait]
pub trait FunctionCaller: Send + Sync {
    async fn call(&self, name: &str, arguments: Value) -> Result<Value, String>;
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self, cancel: &CancellationToken)
        -> Result<CredentialsContext, BackendError>;
}

/// Relay transport connection
#[async_trait]
pub trait Relay: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Ask the relay to replay a response that was streaming when the
    /// previous process died. False if there was nothing to replay.
    async fn replay_incomplete_message(&self) -> Result<bool, BackendError>;
}

/// Remote backend operations
#[async_trait]
pub trait Backend: Send + Sync {
    /// Acquire the workflow for `conversation_id` (unassigned id starts a
    /// new conversation). With `skip_initialization` the discussion
    /// handshake is not re-run.
    async fn get_or_create_workflow(
        &self,
        credentials: &CredentialsContext,
        function_caller: Arc<dyn FunctionCaller>,
        conversation_id: &ConversationId,
        skip_initialization: bool,
    ) -> Result<Arc<dyn ChatWorkflow>, BackendError>;

    async fn conversation_refresh(
        &self,
        credentials: &CredentialsContext,
    ) -> Result<Vec<ConversationSummary>, BackendError>;

    async fn conversation_load(
        &self,
        credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<ConversationRecord, BackendError>;

    async fn conversation_rename(
        &self,
        credentials: &CredentialsContext,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), BackendError>;

    async fn conversation_delete(
        &self,
        credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<(), BackendError>;

    async fn conversation_favorite_toggle(
        &self,
        credentials: &CredentialsContext,
        id: &ConversationId,
        is_favorite: bool,
    ) -> Result<(), BackendError>;

    async fn conversation_generate_title(
        &self,
        credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<String, BackendError>;

    async fn fetch_message_cost(
        &self,
        credentials: &CredentialsContext,
        message_id: &MessageId,
    ) -> Result<Option<i64>, BackendError>;

    async fn send_feedback(
        &self,
        credentials: &CredentialsContext,
        feedback: &Feedback,
    ) -> Result<(), BackendError>;

    async fn load_feedback(
        &self,
        credentials: &CredentialsContext,
        message_id: &MessageId,
    ) -> Result<Option<Feedback>, BackendError>;
}

/// Function caller that rejects every call
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFunctionCaller;

#[async_trait]
impl FunctionCaller for NoFunctionCaller {
    async fn call(&self, name: &str, _arguments: Value) -> Result<Value, String> {
        Err(format!("function calling is not available: {name}"))
    }
}

/// Credentials that never change
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub CredentialsContext);

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn credentials(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CredentialsContext, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::auth("credential request cancelled"));
        }
        Ok(self.0.clone())
    }
}
