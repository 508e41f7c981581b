//! Workflow contract
//!
//! A workflow owns one conversation's request/response exchange with the
//! backend. Its implementation lives with the transport; this crate only
//! consumes its observable state and events.

mod event;
mod state;

pub use event::{AcknowledgeInfo, CloseKind, CloseReason, FragmentPart, ResponseFragment, WorkflowEvent};
pub use state::WorkflowState;

use crate::error::BackendError;
use crate::ids::{ConversationId, MessageId};
use crate::store::ContextEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Context serialized once per submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachedContext {
    pub entries: Vec<ContextEntry>,
    /// JSON payload sent to the backend
    pub payload: String,
}

/// Agent the prompt is addressed to, if not the default one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Interactive,
    /// No user watching; used by the headless prompt path
    Headless,
}

/// Chat request handed to the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub command: String,
    pub text: String,
    pub attached_context: AttachedContext,
    pub agent: Option<AgentRef>,
    pub mode: ChatMode,
}

#[async_trait]
pub trait ChatWorkflow: Send + Sync {
    /// Conversation this workflow is bound to (assigned after initialization
    /// for a new conversation)
    fn conversation_id(&self) -> ConversationId;

    fn state(&self) -> WorkflowState;

    fn is_cancelled(&self) -> bool;

    fn close_reason(&self) -> Option<CloseReason>;

    fn messages_sent(&self) -> usize;

    /// Subscribe to events. Events emitted after this call are delivered in order.
    fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent>;

    /// Wait for the discussion handshake. False if the workflow closed.
    async fn await_discussion_initialization(&self) -> bool;

    async fn send_chat_request(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<(), BackendError>;

    fn cancel_current_chat_request(&self);

    /// Drop the connection regardless of state
    fn disconnect(&self);

    async fn send_edit_run_command_request(
        &self,
        message_id: &MessageId,
        command: String,
    ) -> Result<(), BackendError>;
}
