//! Assistant chat demo
//!
//! Runs one prompt through the orchestrator against an in-process loopback
//! backend that echoes the prompt back word by word, then prints the
//! resulting transcript.

use assistant_chat::{
    AcknowledgeInfo, Assistant, AssistantConfig, Backend, BackendError, ChannelMainContext,
    ChatRequest, ChatWorkflow, CloseKind, CloseReason, ConversationId, ConversationRecord,
    ConversationSummary, CredentialsContext, Feedback, FunctionCaller, MessageId, Relay,
    ResponseFragment, Role, StaticCredentials, WorkflowEvent, WorkflowState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Delay between echoed words
const FRAGMENT_DELAY: Duration = Duration::from_millis(20);

struct LoopbackWorkflow {
    conversation_id: ConversationId,
    state: Mutex<WorkflowState>,
    cancelled: AtomicBool,
    sent: AtomicUsize,
    tx: broadcast::Sender<WorkflowEvent>,
}

impl LoopbackWorkflow {
    fn new(conversation_id: ConversationId) -> Self {
        let (tx, _) = broadcast::channel(128);
        Self {
            conversation_id,
            state: Mutex::new(WorkflowState::NotStarted),
            cancelled: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            tx,
        }
    }

    fn transition(&self, state: WorkflowState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        let _ = self.tx.send(WorkflowEvent::StateChanged(state));
    }

    fn close(&self, reason: CloseReason) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WorkflowState::Closed;
        let _ = self.tx.send(WorkflowEvent::Close(reason));
    }
}

#[async_trait]
impl ChatWorkflow for LoopbackWorkflow {
    fn conversation_id(&self) -> ConversationId {
        self.conversation_id.clone()
    }

    fn state(&self) -> WorkflowState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn close_reason(&self) -> Option<CloseReason> {
        None
    }

    fn messages_sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    async fn await_discussion_initialization(&self) -> bool {
        self.transition(WorkflowState::AwaitingDiscussionInitialization);
        self.transition(WorkflowState::Idle);
        true
    }

    async fn send_chat_request(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.transition(WorkflowState::AwaitingChatAcknowledgement);
        let _ = self.tx.send(WorkflowEvent::AcknowledgeChat(AcknowledgeInfo {
            message_id: uuid::Uuid::new_v4().to_string(),
            content: request.text.clone(),
        }));
        self.transition(WorkflowState::ProcessingStream);

        let tx = self.tx.clone();
        let response_id = uuid::Uuid::new_v4().to_string();
        let words: Vec<String> = request
            .text
            .split_whitespace()
            .map(|word| format!("{word} "))
            .collect();
        tokio::spawn(async move {
            let total = words.len();
            for (i, word) in words.into_iter().enumerate() {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(FRAGMENT_DELAY) => {}
                }
                let fragment =
                    ResponseFragment::text(word, i + 1 == total).with_message_id(&response_id);
                let _ = tx.send(WorkflowEvent::ChatResponse(fragment));
            }
            if total == 0 {
                let fragment = ResponseFragment::text("", true).with_message_id(&response_id);
                let _ = tx.send(WorkflowEvent::ChatResponse(fragment));
            }
            let _ = tx.send(WorkflowEvent::StateChanged(WorkflowState::Idle));
        });
        Ok(())
    }

    fn cancel_current_chat_request(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.transition(WorkflowState::Canceling);
    }

    fn disconnect(&self) {
        self.close(CloseReason::new(CloseKind::ClientCanceled, "disconnected"));
    }

    async fn send_edit_run_command_request(
        &self,
        message_id: &MessageId,
        command: String,
    ) -> Result<(), BackendError> {
        tracing::info!(message_id = %message_id, command = %command, "Edited run command");
        Ok(())
    }
}

#[derive(Default)]
struct LoopbackBackend {
    workflows: Mutex<HashMap<ConversationId, Arc<LoopbackWorkflow>>>,
}

#[async_trait]
impl Backend for LoopbackBackend {
    async fn get_or_create_workflow(
        &self,
        _credentials: &CredentialsContext,
        _function_caller: Arc<dyn FunctionCaller>,
        conversation_id: &ConversationId,
        _skip_initialization: bool,
    ) -> Result<Arc<dyn ChatWorkflow>, BackendError> {
        let id = if conversation_id.is_valid() {
            conversation_id.clone()
        } else {
            ConversationId::new(uuid::Uuid::new_v4().to_string())
        };
        let mut workflows = self
            .workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let workflow = workflows
            .entry(id.clone())
            .or_insert_with(|| Arc::new(LoopbackWorkflow::new(id)))
            .clone();
        Ok(workflow)
    }

    async fn conversation_refresh(
        &self,
        _credentials: &CredentialsContext,
    ) -> Result<Vec<ConversationSummary>, BackendError> {
        Ok(Vec::new())
    }

    async fn conversation_load(
        &self,
        _credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<ConversationRecord, BackendError> {
        Err(BackendError::not_found(format!("no stored conversation {id}")))
    }

    async fn conversation_rename(
        &self,
        _credentials: &CredentialsContext,
        _id: &ConversationId,
        _title: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn conversation_delete(
        &self,
        _credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<(), BackendError> {
        self.workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }

    async fn conversation_favorite_toggle(
        &self,
        _credentials: &CredentialsContext,
        _id: &ConversationId,
        _is_favorite: bool,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn conversation_generate_title(
        &self,
        _credentials: &CredentialsContext,
        _id: &ConversationId,
    ) -> Result<String, BackendError> {
        Ok("\"Loopback conversation\"".to_string())
    }

    async fn fetch_message_cost(
        &self,
        _credentials: &CredentialsContext,
        _message_id: &MessageId,
    ) -> Result<Option<i64>, BackendError> {
        Ok(Some(0))
    }

    async fn send_feedback(
        &self,
        _credentials: &CredentialsContext,
        _feedback: &Feedback,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn load_feedback(
        &self,
        _credentials: &CredentialsContext,
        _message_id: &MessageId,
    ) -> Result<Option<Feedback>, BackendError> {
        Ok(None)
    }
}

struct LoopbackRelay;

#[async_trait]
impl Relay for LoopbackRelay {
    fn is_connected(&self) -> bool {
        true
    }

    async fn replay_incomplete_message(&self) -> Result<bool, BackendError> {
        Ok(false)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assistant_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        "hello from the loopback backend".to_string()
    } else {
        prompt
    };

    let config = AssistantConfig::from_env();
    let (main_context, _main_task) = ChannelMainContext::spawn();
    let assistant = Arc::new(Assistant::new(
        config,
        Arc::new(LoopbackBackend::default()),
        Arc::new(StaticCredentials::default()),
        Arc::new(LoopbackRelay),
        Arc::new(main_context),
    ));

    let response = assistant.run_headless_prompt(prompt).await?;
    tracing::info!(chars = response.chars().count(), "Headless prompt finished");

    for id in assistant.store().conversation_ids() {
        let Some(conversation) = assistant.store().get(&id) else {
            continue;
        };
        println!("# {} ({id})", conversation.title);
        for message in &conversation.messages {
            let who = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            println!("{who}: {}", message.text().trim_end());
        }
    }
    Ok(())
}
