//! Headless prompt path
//!
//! Runs one prompt with no user watching and waits for the full response.
//! Unlike interactive prompts this path enforces a wall-clock timeout.

use super::{Assistant, Prompt};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::ids::ConversationId;
use crate::store::Role;
use crate::workflow::ChatMode;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

impl Assistant {
    /// Submit `text` on a new conversation and return the response text.
    ///
    /// Aborts the prompt and fails with [`SessionError::Timeout`] if the
    /// response does not complete within `headless_timeout`.
    pub async fn run_headless_prompt(self: &Arc<Self>, text: impl Into<String>) -> SessionResult<String> {
        let timeout = self.session.config.headless_timeout;
        let mut events = self.session.events.subscribe();
        let cancel = CancellationToken::new();
        let started: Mutex<Option<ConversationId>> = Mutex::new(None);

        let _submission = self.submit(
            ConversationId::unassigned(),
            Prompt::new(text),
            None,
            ChatMode::Headless,
            &cancel,
        );

        let waited = tokio::time::timeout(timeout, self.await_response(&mut events, &started)).await;
        match waited {
            Ok(result) => result,
            Err(_) => {
                let conversation_id = started
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                tracing::warn!(
                    conversation_id = ?conversation_id,
                    timeout_secs = timeout.as_secs(),
                    "Headless prompt timed out"
                );
                cancel.cancel();
                if let Some(conversation_id) = conversation_id {
                    self.abort_prompt(&conversation_id);
                }
                Err(SessionError::Timeout(timeout))
            }
        }
    }

    async fn await_response(
        &self,
        events: &mut broadcast::Receiver<SessionEvent>,
        started: &Mutex<Option<ConversationId>>,
    ) -> SessionResult<String> {
        // Until the conversation exists, errors for the submission are
        // reported under the unassigned id
        let placeholder = loop {
            match events.recv().await {
                Ok(SessionEvent::IncompleteMessageStarted { message_id, .. }) => break message_id,
                Ok(SessionEvent::ConversationErrorOccurred {
                    conversation_id,
                    error,
                }) if !conversation_id.is_valid() => {
                    return Err(SessionError::Connection(error.message));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Err(SessionError::MainContextClosed),
            }
        };
        let conversation_id = placeholder.conversation_id.clone();
        *started.lock().unwrap_or_else(PoisonError::into_inner) = Some(conversation_id.clone());

        // Completion re-keys the placeholder, so follow it by position. If it
        // already completed, it is the newest assistant message.
        let index = self
            .session
            .store
            .get(&conversation_id)
            .and_then(|conv| {
                conv.position(&placeholder).or_else(|| {
                    conv.messages
                        .iter()
                        .rposition(|m| m.role == Role::Assistant)
                })
            })
            .ok_or_else(|| SessionError::MessageNotFound(placeholder.clone()))?;

        let mut interval = tokio::time::interval(self.session.config.headless_poll_interval);
        loop {
            interval.tick().await;
            while let Ok(event) = events.try_recv() {
                match event {
                    SessionEvent::ConversationErrorOccurred {
                        conversation_id: failed,
                        error,
                    } if failed == conversation_id => {
                        return Err(SessionError::Connection(error.message));
                    }
                    _ => {}
                }
            }
            let conversation = self
                .session
                .store
                .get(&conversation_id)
                .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))?;
            let Some(message) = conversation.messages.get(index) else {
                return Err(SessionError::MessageNotFound(placeholder));
            };
            if message.is_complete {
                return Ok(message.text());
            }
        }
    }
}
