//! Prompt orchestration
//!
//! [`Assistant`] is the entry point a presentation layer talks to. It submits
//! prompts, aborts them, resumes responses interrupted by a restart and
//! passes conversation management through to the backend.
//!
//! One prompt is active per process: there is a single prompt state and a
//! single cancellation token.

mod command;
mod context;
mod conversations;
mod cost;
mod headless;
mod prompt;
mod recovery;
mod title;


pub use command::{parse_command, ParsedCommand, DEFAULT_COMMAND};
pub use context::{ContextSerializer, JsonContextSerializer};
pub use conversations::conversation_from_record;
pub use prompt::Prompt;
pub use recovery::{should_recover, RecoveryDecision, RecoveryReason};
pub use title::sanitize_title;

use crate::backend::{
    Backend, CredentialsContext, CredentialsProvider, FunctionCaller, NoFunctionCaller, Relay,
};
use crate::config::AssistantConfig;
use crate::dispatch::{invoke, MainContext};
use crate::error::{ErrorInfo, SessionResult};
use crate::events::{PromptState, SessionEvent};
use crate::handler::WorkflowEventHandler;
use crate::ids::{ConversationId, MessageId};
use crate::session::Session;
use crate::store::MessageStore;
use crate::workflow::ChatWorkflow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// The exchange currently driving the prompt state
struct ActiveExchange {
    conversation_id: ConversationId,
    workflow: Arc<dyn ChatWorkflow>,
    /// Bound once the placeholder exists
    handler: Option<WorkflowEventHandler>,
}

/// Client-side chat session orchestrator
pub struct Assistant {
    session: Arc<Session>,
    backend: Arc<dyn Backend>,
    credentials: Arc<dyn CredentialsProvider>,
    relay: Arc<dyn Relay>,
    function_caller: Arc<dyn FunctionCaller>,
    serializer: Arc<dyn ContextSerializer>,
    cancel: Mutex<CancellationToken>,
    active: Mutex<Option<ActiveExchange>>,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        backend: Arc<dyn Backend>,
        credentials: Arc<dyn CredentialsProvider>,
        relay: Arc<dyn Relay>,
        main: Arc<dyn MainContext>,
    ) -> Self {
        Self {
            session: Arc::new(Session::new(config, main)),
            backend,
            credentials,
            relay,
            function_caller: Arc::new(NoFunctionCaller),
            serializer: Arc::new(JsonContextSerializer),
            cancel: Mutex::new(CancellationToken::new()),
            active: Mutex::new(None),
        }
    }

    /// Use `caller` for tool calls requested by the backend
    #[must_use]
    pub fn with_function_caller(mut self, caller: Arc<dyn FunctionCaller>) -> Self {
        self.function_caller = caller;
        self
    }

    #[must_use]
    pub fn with_context_serializer(mut self, serializer: Arc<dyn ContextSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn store(&self) -> &MessageStore {
        &self.session.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.events.subscribe()
    }

    pub fn prompt_state(&self) -> PromptState {
        self.session.prompt_state.get()
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.session.config
    }

    /// Cancel the in-flight prompt for `conversation_id`.
    ///
    /// No-op once the prompt state is `Canceling` or `NotConnected`. The
    /// prompt state is `NotConnected` when this returns; the workflow may
    /// still be tearing down in the background. The exchange's handler is
    /// detached here, so late workflow events cannot touch a newer prompt.
    pub fn abort_prompt(&self, conversation_id: &ConversationId) {
        if !conversation_id.is_valid() {
            tracing::warn!("Abort requested for an invalid conversation id");
            return;
        }
        let state = self.session.prompt_state.get();
        if state.is_settled() {
            tracing::debug!(conversation_id = %conversation_id, state = ?state, "Nothing to abort");
            return;
        }

        tracing::info!(conversation_id = %conversation_id, "Aborting prompt");
        self.current_cancel().cancel();

        let active = self.active().take();
        if let Some(active) = active {
            if let Some(handler) = &active.handler {
                handler.close();
                let session = self.session.clone();
                let message_id = handler.message_id();
                self.session
                    .main
                    .dispatch(Box::new(move || seal_placeholder(&session, &message_id)));
            }
            if active.conversation_id == *conversation_id {
                active.workflow.cancel_current_chat_request();
            }
            active.workflow.disconnect();
        }

        self.session
            .prompt_state
            .set(conversation_id, PromptState::NotConnected);
    }

    fn current_cancel(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a fresh prompt token derived from the caller's
    fn begin_prompt(&self, caller: &CancellationToken) -> CancellationToken {
        let token = caller.child_token();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveExchange>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active(
        &self,
        conversation_id: ConversationId,
        workflow: Arc<dyn ChatWorkflow>,
        handler: Option<WorkflowEventHandler>,
    ) {
        *self.active() = Some(ActiveExchange {
            conversation_id,
            workflow,
            handler,
        });
    }

    /// Workflow of the active exchange, if it belongs to `conversation_id`
    fn active_workflow(&self, conversation_id: &ConversationId) -> Option<Arc<dyn ChatWorkflow>> {
        self.active()
            .as_ref()
            .filter(|active| active.conversation_id == *conversation_id)
            .map(|active| active.workflow.clone())
    }

    async fn fetch_credentials(&self) -> SessionResult<CredentialsContext> {
        Ok(self
            .credentials
            .credentials(&CancellationToken::new())
            .await?)
    }

    /// Report a failure that ends the current prompt
    fn fail_prompt(&self, conversation_id: &ConversationId, error: ErrorInfo) {
        self.session.events.conversation_error(conversation_id, error);
        self.session
            .prompt_state
            .set(conversation_id, PromptState::NotConnected);
    }

    /// Complete an assistant placeholder that will receive no more content
    async fn abandon_placeholder(&self, message_id: MessageId) -> SessionResult<()> {
        let session = self.session.clone();
        invoke(self.session.main.as_ref(), move || {
            seal_placeholder(&session, &message_id);
        })
        .await
    }
}

/// Complete `message_id` as-is. Must run on the main context.
fn seal_placeholder(session: &Session, message_id: &MessageId) {
    let conversation_id = &message_id.conversation_id;
    if let Some(final_id) = session.store.complete_message(message_id, None) {
        session.settle_cost(&final_id);
        session
            .events
            .publish(SessionEvent::IncompleteMessageCompleted(conversation_id.clone()));
        session.events.conversation_changed(conversation_id);
    }
}
