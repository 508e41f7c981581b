//! Client-side orchestration for a streaming, tool-augmented chat session.
//!
//! The [`Assistant`] submits prompts to a backend [`ChatWorkflow`], folds the
//! streamed response into an in-memory [`MessageStore`], supports aborting
//! the active prompt, and can resume a response that was mid-stream when the
//! host process restarted.
//!
//! Store mutation is marshaled onto a single [`MainContext`]; outward
//! notifications are published as [`SessionEvent`]s.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handler;
pub mod ids;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use backend::{
    Backend, ConversationRecord, ConversationSummary, CredentialsContext, CredentialsProvider,
    Feedback, FunctionCaller, HistoryFunctionCall, HistoryMessage, NoFunctionCaller, Relay,
    Sentiment, StaticCredentials,
};
pub use config::AssistantConfig;
pub use dispatch::{invoke, spawn_logged, ChannelMainContext, InlineMainContext, MainContext};
pub use error::{BackendError, BackendErrorKind, ErrorInfo, SessionError, SessionResult};
pub use events::{EventBus, PromptState, SessionEvent};
pub use handler::{HandlerBinding, WorkflowEventHandler};
pub use ids::{ConversationId, MessageId, MessageIdKind};
pub use orchestrator::{Assistant, Prompt};
pub use store::{Block, CommandExecution, ContextEntry, Conversation, Message, MessageStore, Role};
pub use workflow::{
    AcknowledgeInfo, AgentRef, AttachedContext, ChatMode, ChatRequest, ChatWorkflow, CloseKind,
    CloseReason, FragmentPart, ResponseFragment, WorkflowEvent, WorkflowState,
};
