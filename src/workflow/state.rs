//! Workflow state and its projection onto the prompt state

use crate::events::PromptState;
use serde::{Deserialize, Serialize};

/// Fine-grained protocol state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Not connected to the backend yet
    #[default]
    NotStarted,
    /// Transport connecting
    Connecting,
    /// Discussion handshake in progress
    AwaitingDiscussionInitialization,
    /// Ready to accept a chat request
    Idle,
    /// Chat request sent, waiting for acknowledgement
    AwaitingChatAcknowledgement,
    /// Response fragments streaming in
    ProcessingStream,
    /// Backend waits for the client to run a function call
    ProcessingFunctionCall,
    /// Cancellation of the current exchange in progress
    Canceling,
    /// Connection closed
    Closed,
}

impl WorkflowState {
    /// Fixed lookup from workflow state to prompt state
    pub fn prompt_state(self) -> PromptState {
        match self {
            WorkflowState::NotStarted | WorkflowState::Closed => PromptState::NotConnected,
            WorkflowState::Connecting | WorkflowState::AwaitingDiscussionInitialization => {
                PromptState::Connecting
            }
            WorkflowState::Idle => PromptState::Connected,
            WorkflowState::AwaitingChatAcknowledgement | WorkflowState::ProcessingStream => {
                PromptState::AwaitingServer
            }
            WorkflowState::ProcessingFunctionCall => PromptState::AwaitingClient,
            WorkflowState::Canceling => PromptState::Canceling,
        }
    }
}
