//! Resuming a response interrupted by a process restart
//!
//! A conversation whose last message is a user message never received its
//! reply. After a restart the relay can replay whatever the backend kept
//! streaming; replayed fragments go through the ordinary handler path.

use super::Assistant;
use crate::dispatch::{invoke, spawn_logged};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::handler::{HandlerBinding, WorkflowEventHandler};
use crate::ids::{ConversationId, MessageId};
use crate::store::{Conversation, Role};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of analyzing a conversation for recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryDecision {
    pub needs_recovery: bool,
    /// Reason for the decision (for debugging)
    pub reason: RecoveryReason,
}

/// Why we made a particular recovery decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// No messages in conversation
    EmptyConversation,
    /// Last message is an assistant or system message
    LastMessageNotUser,
    /// A response is already streaming in this process
    ResponseInProgress,
    /// Last message is a user message with no reply
    InterruptedMidResponse,
}

impl RecoveryDecision {
    fn skip(reason: RecoveryReason) -> Self {
        Self {
            needs_recovery: false,
            reason,
        }
    }
}

/// Decide whether `conversation` was interrupted mid-response
pub fn should_recover(conversation: &Conversation) -> RecoveryDecision {
    let Some(last) = conversation.messages.last() else {
        return RecoveryDecision::skip(RecoveryReason::EmptyConversation);
    };
    if conversation.incomplete_count() > 0 {
        return RecoveryDecision::skip(RecoveryReason::ResponseInProgress);
    }
    if last.role != Role::User {
        return RecoveryDecision::skip(RecoveryReason::LastMessageNotUser);
    }
    RecoveryDecision {
        needs_recovery: true,
        reason: RecoveryReason::InterruptedMidResponse,
    }
}

impl Assistant {
    /// Resume the response `conversation_id` was waiting for when the
    /// previous process died.
    ///
    /// Best effort: failures are logged and never propagate.
    pub fn recover_incomplete_message(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> JoinHandle<()> {
        let this = self.clone();
        spawn_logged("recovery", async move {
            if let Err(e) = this.recover(&conversation_id).await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Recovery failed");
            }
            Ok(())
        })
    }

    async fn recover(&self, conversation_id: &ConversationId) -> SessionResult<()> {
        if !conversation_id.is_valid() {
            return Err(SessionError::InvalidConversation(conversation_id.clone()));
        }
        let conversation = self
            .session
            .store
            .get(conversation_id)
            .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))?;
        let decision = should_recover(&conversation);
        if !decision.needs_recovery {
            tracing::debug!(
                conversation_id = %conversation_id,
                reason = ?decision.reason,
                "Nothing to recover"
            );
            return Ok(());
        }

        if !self.wait_for_relay().await {
            tracing::warn!(conversation_id = %conversation_id, "Relay never became ready, skipping recovery");
            return Ok(());
        }

        let Some(placeholder) = self.append_recovery_placeholder(conversation_id).await? else {
            return Ok(());
        };
        tracing::info!(conversation_id = %conversation_id, "Recovering interrupted response");

        let replayed = self.replay(conversation_id, placeholder.clone()).await;
        match replayed {
            Ok(true) => {
                tracing::info!(conversation_id = %conversation_id, "Replay requested");
                Ok(())
            }
            Ok(false) => {
                tracing::info!(conversation_id = %conversation_id, "No response to replay");
                self.abandon_placeholder(placeholder).await
            }
            Err(e) => {
                self.abandon_placeholder(placeholder).await?;
                Err(e)
            }
        }
    }

    /// Poll relay readiness a bounded number of times
    async fn wait_for_relay(&self) -> bool {
        let attempts = self.session.config.relay_ready_attempts;
        let delay = self.session.config.relay_ready_delay;
        for attempt in 1..=attempts {
            if self.relay.is_connected() {
                return true;
            }
            tracing::debug!(attempt, attempts, "Relay not ready");
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    /// Re-check the conversation and append the stand-in placeholder.
    ///
    /// The relay wait can be long enough for the user to submit a prompt, so
    /// the decision is taken again on the main context. `None` if the
    /// conversation no longer needs recovery.
    async fn append_recovery_placeholder(
        &self,
        conversation_id: &ConversationId,
    ) -> SessionResult<Option<MessageId>> {
        let session = self.session.clone();
        let conversation_id = conversation_id.clone();
        invoke(self.session.main.as_ref(), move || {
            let conversation = session
                .store
                .get(&conversation_id)
                .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))?;
            let decision = should_recover(&conversation);
            let prompt_state = session.prompt_state.get();
            if !decision.needs_recovery || prompt_state.is_busy() {
                tracing::info!(
                    conversation_id = %conversation_id,
                    reason = ?decision.reason,
                    prompt_state = ?prompt_state,
                    "Conversation moved on while waiting for the relay"
                );
                return Ok(None);
            }

            let placeholder = session.store.next_incomplete_id(&conversation_id);
            session
                .store
                .append_placeholder(&conversation_id, placeholder.clone())
                .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))?;
            session.events.conversation_changed(&conversation_id);
            session.events.publish(SessionEvent::IncompleteMessageStarted {
                conversation_id,
                message_id: placeholder.clone(),
            });
            Ok(Some(placeholder))
        })
        .await?
    }

    /// Attach a handler to a workflow that skips the handshake and ask the
    /// relay to replay. False if there was nothing to replay.
    async fn replay(
        &self,
        conversation_id: &ConversationId,
        placeholder: MessageId,
    ) -> SessionResult<bool> {
        let credentials = self.fetch_credentials().await?;
        let workflow = self
            .backend
            .get_or_create_workflow(
                &credentials,
                self.function_caller.clone(),
                conversation_id,
                true,
            )
            .await?;

        // Aborting a replayed response works like aborting a prompt
        let cancel = self.begin_prompt(&CancellationToken::new());
        let handler = WorkflowEventHandler::bind(
            self.session.clone(),
            workflow.clone(),
            HandlerBinding {
                conversation_id: conversation_id.clone(),
                message_id: placeholder,
                is_new_conversation: false,
                cancel,
            },
        );
        self.set_active(conversation_id.clone(), workflow, Some(handler.clone()));

        match self.relay.replay_incomplete_message().await {
            Ok(true) => Ok(true),
            Ok(false) => {
                handler.close();
                Ok(false)
            }
            Err(e) => {
                handler.close();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Message;

    fn conversation(messages: Vec<Message>) -> Conversation {
        let mut conv = Conversation::new(ConversationId::new("c"));
        conv.messages = messages;
        conv
    }

    fn id(n: &str) -> MessageId {
        MessageId::external(ConversationId::new("c"), n)
    }

    fn assistant(n: &str, complete: bool) -> Message {
        let mut message = Message::placeholder(id(n));
        message.is_complete = complete;
        message
    }

    #[test]
    fn test_empty_conversation() {
        let decision = should_recover(&conversation(vec![]));
        assert!(!decision.needs_recovery);
        assert_eq!(decision.reason, RecoveryReason::EmptyConversation);
    }

    #[test]
    fn test_trailing_user_message_needs_recovery() {
        let decision = should_recover(&conversation(vec![
            Message::user(id("u1"), "hi", vec![]),
            assistant("a1", true),
            Message::user(id("u2"), "and then?", vec![]),
        ]));
        assert!(decision.needs_recovery);
        assert_eq!(decision.reason, RecoveryReason::InterruptedMidResponse);
    }

    #[test]
    fn test_completed_reply_is_not_recovered() {
        let decision = should_recover(&conversation(vec![
            Message::user(id("u1"), "hi", vec![]),
            assistant("a1", true),
        ]));
        assert!(!decision.needs_recovery);
        assert_eq!(decision.reason, RecoveryReason::LastMessageNotUser);
    }

    #[test]
    fn test_streaming_reply_is_not_recovered() {
        let decision = should_recover(&conversation(vec![
            Message::user(id("u1"), "hi", vec![]),
            assistant("a1", false),
        ]));
        assert_eq!(decision.reason, RecoveryReason::ResponseInProgress);
    }
}
