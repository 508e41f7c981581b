//! Outward notifications and the client-visible prompt state

use crate::backend::ConversationSummary;
use crate::error::ErrorInfo;
use crate::ids::{ConversationId, MessageId};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

/// Coarse prompt status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    AwaitingServer,
    AwaitingClient,
    Canceling,
}

impl PromptState {
    /// States in which a prompt can no longer be aborted
    pub fn is_settled(self) -> bool {
        matches!(self, PromptState::NotConnected | PromptState::Canceling)
    }

    /// An exchange is being set up or streaming
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            PromptState::Connecting | PromptState::AwaitingServer | PromptState::AwaitingClient
        )
    }
}

/// Notifications consumed by a presentation layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConversationsRefreshed(Vec<ConversationSummary>),
    ConversationLoaded(ConversationId),
    ConversationChanged(ConversationId),
    ConversationCreated(ConversationId),
    ConversationDeleted(ConversationId),
    ConversationErrorOccurred {
        conversation_id: ConversationId,
        error: ErrorInfo,
    },
    PromptStateChanged {
        conversation_id: ConversationId,
        state: PromptState,
    },
    IncompleteMessageStarted {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    IncompleteMessageCompleted(ConversationId),
    MessageCostReceived {
        message_id: MessageId,
        cost: Option<i64>,
        is_pending: bool,
    },
}

/// Broadcast bus for [`SessionEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; having no subscribers is fine
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn conversation_changed(&self, id: &ConversationId) {
        self.publish(SessionEvent::ConversationChanged(id.clone()));
    }

    pub fn conversation_error(&self, id: &ConversationId, error: ErrorInfo) {
        tracing::warn!(conversation_id = %id, error = %error.message, "Conversation error");
        self.publish(SessionEvent::ConversationErrorOccurred {
            conversation_id: id.clone(),
            error,
        });
    }
}

/// The single process-wide prompt state
pub struct PromptStateCell {
    current: Mutex<PromptState>,
    bus: EventBus,
}

impl PromptStateCell {
    pub fn new(bus: EventBus) -> Self {
        Self {
            current: Mutex::new(PromptState::NotConnected),
            bus,
        }
    }

    pub fn get(&self) -> PromptState {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign a new state. Returns true and notifies only if it changed.
    pub fn set(&self, conversation_id: &ConversationId, state: PromptState) -> bool {
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == state {
                return false;
            }
            *current = state;
        }
        tracing::debug!(conversation_id = %conversation_id, state = ?state, "Prompt state changed");
        self.bus.publish(SessionEvent::PromptStateChanged {
            conversation_id: conversation_id.clone(),
            state,
        });
        true
    }
}
