//! Workflow event handler
//!
//! Folds one exchange's workflow events into the message store. A handler
//! is bound to a (workflow, conversation, assistant message) triple and
//! detaches itself on the last fragment or on close.

mod accumulator;

pub use accumulator::ResponseAccumulator;

use crate::error::ErrorInfo;
use crate::events::{PromptState, SessionEvent};
use crate::ids::{ConversationId, MessageId};
use crate::session::Session;
use crate::store::Message;
use crate::workflow::{ChatWorkflow, CloseReason, ResponseFragment, WorkflowEvent, WorkflowState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// What a handler is bound to
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    pub conversation_id: ConversationId,
    /// The assistant placeholder being filled
    pub message_id: MessageId,
    /// Run new-conversation bookkeeping on completion
    pub is_new_conversation: bool,
    /// Local cancellation for this exchange
    pub cancel: CancellationToken,
}

/// Subscription of one exchange to its workflow's events
#[derive(Clone)]
pub struct WorkflowEventHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    session: Arc<Session>,
    workflow: Arc<dyn ChatWorkflow>,
    conversation_id: ConversationId,
    is_new_conversation: bool,
    cancel: CancellationToken,
    exchange: Mutex<Exchange>,
    closed: AtomicBool,
    /// Stops the forwarding task
    listener: CancellationToken,
}

struct Exchange {
    message_id: MessageId,
    accumulator: ResponseAccumulator,
}

impl WorkflowEventHandler {
    /// Subscribe to `workflow` and start forwarding its events onto the main
    /// context. Subscription happens before this returns, so a request sent
    /// afterwards cannot race past the handler.
    pub fn bind(
        session: Arc<Session>,
        workflow: Arc<dyn ChatWorkflow>,
        binding: HandlerBinding,
    ) -> Self {
        let handler = Self::detached(session, workflow, binding);
        handler.start_forwarding();
        handler
    }

    /// Build a handler without subscribing; events must be fed to [`handle`].
    ///
    /// [`handle`]: WorkflowEventHandler::handle
    pub fn detached(
        session: Arc<Session>,
        workflow: Arc<dyn ChatWorkflow>,
        binding: HandlerBinding,
    ) -> Self {
        let seed = session
            .store
            .message(&binding.message_id)
            .map(|m| ResponseAccumulator::seeded(&m.blocks))
            .unwrap_or_default();

        Self {
            inner: Arc::new(HandlerInner {
                session,
                workflow,
                conversation_id: binding.conversation_id,
                is_new_conversation: binding.is_new_conversation,
                cancel: binding.cancel,
                exchange: Mutex::new(Exchange {
                    message_id: binding.message_id,
                    accumulator: seed,
                }),
                closed: AtomicBool::new(false),
                listener: CancellationToken::new(),
            }),
        }
    }

    fn start_forwarding(&self) {
        let mut rx = self.inner.workflow.subscribe();
        let listener = self.inner.listener.clone();
        let handler = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = listener.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            let target = handler.clone();
                            handler
                                .inner
                                .session
                                .main
                                .dispatch(Box::new(move || target.handle(event)));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Dropped fragments cannot be replayed
                            let target = handler.clone();
                            handler
                                .inner
                                .session
                                .main
                                .dispatch(Box::new(move || target.on_lagged(skipped)));
                            break;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!(conversation_id = %handler.inner.conversation_id, "Handler detached");
        });
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.inner.conversation_id
    }

    /// Current id of the bound assistant message (changes on promotion)
    pub fn message_id(&self) -> MessageId {
        self.exchange().message_id.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Detach from the workflow. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.listener.cancel();
        }
    }

    fn exchange(&self) -> std::sync::MutexGuard<'_, Exchange> {
        self.inner
            .exchange
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one workflow event. Must run on the main context.
    pub fn handle(&self, event: WorkflowEvent) {
        if self.is_closed() {
            tracing::trace!(conversation_id = %self.inner.conversation_id, "Ignoring event after detach");
            return;
        }
        match event {
            WorkflowEvent::ChatResponse(fragment) => self.on_chat_response(&fragment),
            WorkflowEvent::Close(reason) => self.on_close(&reason),
            WorkflowEvent::StateChanged(state) => self.on_state_changed(state),
            // Owned by the prompt's acknowledgement listener
            WorkflowEvent::AcknowledgeChat(_) => {}
        }
    }

    fn on_chat_response(&self, fragment: &ResponseFragment) {
        let session = &self.inner.session;
        let conversation_id = &self.inner.conversation_id;

        let (message_id, blocks) = {
            let mut exchange = self.exchange();
            exchange.accumulator.apply(&fragment.parts);
            (
                exchange.message_id.clone(),
                exchange.accumulator.blocks().to_vec(),
            )
        };

        let applied = session
            .store
            .update_message(&message_id, |message| {
                if message.is_complete {
                    return false;
                }
                message.blocks = blocks;
                true
            })
            .unwrap_or(false);
        if !applied {
            tracing::warn!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Fragment for a missing or completed message"
            );
        }

        if fragment.is_last {
            self.finish_response(&message_id, fragment.message_id.as_deref());
        }

        session.events.conversation_changed(conversation_id);
    }

    fn finish_response(&self, message_id: &MessageId, external_id: Option<&str>) {
        let session = &self.inner.session;
        let conversation_id = &self.inner.conversation_id;

        if let Some(final_id) = session.store.complete_message(message_id, external_id) {
            session.settle_cost(&final_id);
            self.exchange().message_id = final_id;
        }
        session
            .events
            .publish(SessionEvent::IncompleteMessageCompleted(conversation_id.clone()));
        self.close();
        // State changes after the last fragment are no longer observed
        if !self.inner.cancel.is_cancelled() {
            session
                .prompt_state
                .set(conversation_id, PromptState::Connected);
        }

        tracing::info!(conversation_id = %conversation_id, "Response completed");

        if self.inner.is_new_conversation {
            let session = session.clone();
            let conversation_id = conversation_id.clone();
            self.inner.session.main.dispatch(Box::new(move || {
                session.rehydrate_command_history(&conversation_id);
            }));
        }
    }

    fn on_close(&self, reason: &CloseReason) {
        let session = &self.inner.session;
        let conversation_id = &self.inner.conversation_id;
        let cancelled = self.inner.cancel.is_cancelled() || self.inner.workflow.is_cancelled();

        tracing::info!(
            conversation_id = %conversation_id,
            reason = %reason,
            cancelled,
            "Workflow closed"
        );

        if !reason.is_graceful() && !cancelled {
            let text = format!(
                "The connection to the assistant was closed unexpectedly: {}",
                reason.description
            );
            let error_id = session.store.next_internal_id(conversation_id);
            session
                .store
                .append(conversation_id, Message::error(error_id, text.clone()));
            session.events.conversation_error(
                conversation_id,
                ErrorInfo::new(text).with_details(reason.to_string()),
            );
        }

        self.complete_unfinished();
        // After a cancel, abort owns the prompt state
        if !self.inner.cancel.is_cancelled() {
            session
                .prompt_state
                .set(conversation_id, PromptState::NotConnected);
        }
        self.close();
        session.events.conversation_changed(conversation_id);
    }

    /// The subscription fell behind and lost `skipped` events
    fn on_lagged(&self, skipped: u64) {
        if self.is_closed() {
            return;
        }
        let session = &self.inner.session;
        let conversation_id = &self.inner.conversation_id;
        tracing::warn!(
            conversation_id = %conversation_id,
            skipped,
            "Workflow events dropped, abandoning response"
        );

        if !self.inner.cancel.is_cancelled() {
            session.events.conversation_error(
                conversation_id,
                ErrorInfo::new("Part of the assistant's response was lost")
                    .with_details(format!("{skipped} workflow events dropped")),
            );
            session
                .prompt_state
                .set(conversation_id, PromptState::NotConnected);
        }
        self.complete_unfinished();
        self.close();
        session.events.conversation_changed(conversation_id);
    }

    /// Complete the bound message with whatever it holds so far
    fn complete_unfinished(&self) {
        let session = &self.inner.session;
        let message_id = self.message_id();
        if let Some(final_id) = session.store.complete_message(&message_id, None) {
            session.settle_cost(&final_id);
            self.exchange().message_id = final_id;
            session.events.publish(SessionEvent::IncompleteMessageCompleted(
                self.inner.conversation_id.clone(),
            ));
        }
    }

    fn on_state_changed(&self, state: WorkflowState) {
        if self.inner.cancel.is_cancelled() {
            // Abort owns the prompt state from here on
            return;
        }
        self.inner
            .session
            .prompt_state
            .set(&self.inner.conversation_id, state.prompt_state());
    }
}
