//! Mock implementations for testing
//!
//! These mocks let the orchestrator run end to end without a transport.

use crate::backend::{
    Backend, ConversationRecord, ConversationSummary, CredentialsContext, Feedback,
    FunctionCaller,
};
use crate::error::BackendError;
use crate::ids::{ConversationId, MessageId};
use crate::workflow::{
    ChatRequest, ChatWorkflow, CloseKind, CloseReason, WorkflowEvent, WorkflowState,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

/// Poll `predicate` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future` with a test-sized timeout
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

// ============================================================================
// Mock Workflow
// ============================================================================

/// Scriptable workflow: events queued with [`MockWorkflow::script`] are
/// emitted when a chat request is sent
#[allow(dead_code)]
pub struct MockWorkflow {
    conversation_id: Mutex<ConversationId>,
    state: Mutex<WorkflowState>,
    cancelled: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    tx: broadcast::Sender<WorkflowEvent>,
    initializes: AtomicBool,
    init_gate: Mutex<Option<Arc<Notify>>>,
    send_error: Mutex<Option<BackendError>>,
    script: Mutex<Vec<WorkflowEvent>>,
    /// Record of chat requests sent
    pub requests: Mutex<Vec<ChatRequest>>,
    /// Record of edit-run-command requests sent
    pub edits: Mutex<Vec<(MessageId, String)>>,
    pub cancel_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockWorkflow {
    pub fn new(conversation_id: ConversationId) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            conversation_id: Mutex::new(conversation_id),
            state: Mutex::new(WorkflowState::NotStarted),
            cancelled: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            tx,
            initializes: AtomicBool::new(true),
            init_gate: Mutex::new(None),
            send_error: Mutex::new(None),
            script: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            cancel_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Emit an event to current subscribers
    pub fn emit(&self, event: WorkflowEvent) {
        match &event {
            WorkflowEvent::StateChanged(state) => *self.state.lock().unwrap() = *state,
            WorkflowEvent::Close(reason) => {
                *self.state.lock().unwrap() = WorkflowState::Closed;
                *self.close_reason.lock().unwrap() = Some(reason.clone());
            }
            _ => {}
        }
        let _ = self.tx.send(event);
    }

    /// Events to emit once a chat request is sent
    pub fn script(&self, events: Vec<WorkflowEvent>) {
        *self.script.lock().unwrap() = events;
    }

    /// Make discussion initialization report a closed workflow
    pub fn fail_initialization(&self) {
        self.initializes.store(false, Ordering::SeqCst);
    }

    /// Block discussion initialization until the returned notify fires
    pub fn hold_initialization(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.init_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_send(&self, error: BackendError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatWorkflow for MockWorkflow {
    fn conversation_id(&self) -> ConversationId {
        self.conversation_id.lock().unwrap().clone()
    }

    fn state(&self) -> WorkflowState {
        *self.state.lock().unwrap()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().unwrap().clone()
    }

    fn messages_sent(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    async fn await_discussion_initialization(&self) -> bool {
        let gate = self.init_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let ok = self.initializes.load(Ordering::SeqCst);
        if ok {
            self.emit(WorkflowEvent::StateChanged(WorkflowState::Idle));
        } else {
            self.emit(WorkflowEvent::Close(CloseReason::new(
                CloseKind::InitializationFailed,
                "handshake rejected",
            )));
        }
        ok
    }

    async fn send_chat_request(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        if let Some(error) = self.send_error.lock().unwrap().take() {
            return Err(error);
        }
        self.requests.lock().unwrap().push(request);
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        for event in script {
            self.emit(event);
        }
        Ok(())
    }

    fn cancel_current_chat_request(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        self.emit(WorkflowEvent::StateChanged(WorkflowState::Canceling));
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.emit(WorkflowEvent::Close(CloseReason::new(
            CloseKind::ClientCanceled,
            "disconnected by client",
        )));
    }

    async fn send_edit_run_command_request(
        &self,
        message_id: &MessageId,
        command: String,
    ) -> Result<(), BackendError> {
        self.edits
            .lock()
            .unwrap()
            .push((message_id.clone(), command));
        Ok(())
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend serving a single mock workflow and canned records
#[allow(dead_code)]
pub struct MockBackend {
    workflow: Mutex<Option<Arc<MockWorkflow>>>,
    pub summaries: Mutex<Vec<ConversationSummary>>,
    pub records: Mutex<HashMap<ConversationId, ConversationRecord>>,
    pub title: Mutex<Result<String, BackendError>>,
    pub costs: Mutex<HashMap<MessageId, i64>>,
    pub feedback: Mutex<Vec<Feedback>>,
    failure: Mutex<Option<BackendError>>,
    /// Record of (conversation id, skip_initialization) workflow requests
    pub workflow_requests: Mutex<Vec<(ConversationId, bool)>>,
    /// Record of mutating CRUD calls
    pub calls: Mutex<Vec<String>>,
    /// Function caller handed over with the last workflow request
    pub function_caller: Mutex<Option<Arc<dyn FunctionCaller>>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn new() -> Self {
        Self {
            workflow: Mutex::new(None),
            summaries: Mutex::new(Vec::new()),
            records: Mutex::new(HashMap::new()),
            title: Mutex::new(Err(BackendError::not_found("no title queued"))),
            costs: Mutex::new(HashMap::new()),
            feedback: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            workflow_requests: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            function_caller: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_workflow(self, workflow: Arc<MockWorkflow>) -> Self {
        *self.workflow.lock().unwrap() = Some(workflow);
        self
    }

    #[must_use]
    pub fn with_title(self, title: &str) -> Self {
        *self.title.lock().unwrap() = Ok(title.to_string());
        self
    }

    /// Make every CRUD call fail with `error`
    pub fn fail_with(&self, error: BackendError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, call: String) -> Result<(), BackendError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn get_or_create_workflow(
        &self,
        _credentials: &CredentialsContext,
        function_caller: Arc<dyn FunctionCaller>,
        conversation_id: &ConversationId,
        skip_initialization: bool,
    ) -> Result<Arc<dyn ChatWorkflow>, BackendError> {
        *self.function_caller.lock().unwrap() = Some(function_caller);
        self.workflow_requests
            .lock()
            .unwrap()
            .push((conversation_id.clone(), skip_initialization));
        match self.workflow.lock().unwrap().clone() {
            Some(workflow) => Ok(workflow),
            None => Err(BackendError::network("no workflow available")),
        }
    }

    async fn conversation_refresh(
        &self,
        _credentials: &CredentialsContext,
    ) -> Result<Vec<ConversationSummary>, BackendError> {
        self.check("refresh".into())?;
        Ok(self.summaries.lock().unwrap().clone())
    }

    async fn conversation_load(
        &self,
        _credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<ConversationRecord, BackendError> {
        self.check(format!("load {id}"))?;
        self.records
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("conversation {id}")))
    }

    async fn conversation_rename(
        &self,
        _credentials: &CredentialsContext,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), BackendError> {
        self.check(format!("rename {id} {title}"))
    }

    async fn conversation_delete(
        &self,
        _credentials: &CredentialsContext,
        id: &ConversationId,
    ) -> Result<(), BackendError> {
        self.check(format!("delete {id}"))
    }

    async fn conversation_favorite_toggle(
        &self,
        _credentials: &CredentialsContext,
        id: &ConversationId,
        is_favorite: bool,
    ) -> Result<(), BackendError> {
        self.check(format!("favorite {id} {is_favorite}"))
    }

    async fn conversation_generate_title(
        &self,
        _credentials: &CredentialsContext,
        _id: &ConversationId,
    ) -> Result<String, BackendError> {
        self.title.lock().unwrap().clone()
    }

    async fn fetch_message_cost(
        &self,
        _credentials: &CredentialsContext,
        message_id: &MessageId,
    ) -> Result<Option<i64>, BackendError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.costs.lock().unwrap().get(message_id).copied())
    }

    async fn send_feedback(
        &self,
        _credentials: &CredentialsContext,
        feedback: &Feedback,
    ) -> Result<(), BackendError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.feedback.lock().unwrap().push(feedback.clone());
        Ok(())
    }

    async fn load_feedback(
        &self,
        _credentials: &CredentialsContext,
        message_id: &MessageId,
    ) -> Result<Option<Feedback>, BackendError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .feedback
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|f| &f.message_id == message_id)
            .cloned())
    }
}

// ============================================================================
// Mock Relay
// ============================================================================

/// Relay that becomes ready after a number of readiness checks
#[allow(dead_code)]
pub struct MockRelay {
    ready_after: AtomicUsize,
    checks: AtomicUsize,
    replay: Mutex<Result<bool, BackendError>>,
    replay_target: Mutex<Option<(Arc<MockWorkflow>, Vec<WorkflowEvent>)>>,
    pub replay_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockRelay {
    pub fn connected() -> Self {
        Self::ready_after(0)
    }

    /// Ready once `checks` readiness checks have failed
    pub fn ready_after(checks: usize) -> Self {
        Self {
            ready_after: AtomicUsize::new(checks),
            checks: AtomicUsize::new(0),
            replay: Mutex::new(Ok(true)),
            replay_target: Mutex::new(None),
            replay_calls: AtomicUsize::new(0),
        }
    }

    pub fn never_ready() -> Self {
        Self::ready_after(usize::MAX)
    }

    /// Emit `events` on `workflow` when a replay is requested
    #[must_use]
    pub fn replaying(self, workflow: Arc<MockWorkflow>, events: Vec<WorkflowEvent>) -> Self {
        *self.replay_target.lock().unwrap() = Some((workflow, events));
        self
    }

    #[must_use]
    pub fn replay_result(self, result: Result<bool, BackendError>) -> Self {
        *self.replay.lock().unwrap() = result;
        self
    }

    /// Report ready on every check from now on
    pub fn make_ready(&self) {
        self.ready_after.store(0, Ordering::SeqCst);
    }

    pub fn readiness_checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::backend::Relay for MockRelay {
    fn is_connected(&self) -> bool {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        seen >= self.ready_after.load(Ordering::SeqCst)
    }

    async fn replay_incomplete_message(&self) -> Result<bool, BackendError> {
        self.replay_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((workflow, events)) = self.replay_target.lock().unwrap().take() {
            for event in events {
                workflow.emit(event);
            }
        }
        self.replay.lock().unwrap().clone()
    }
}

// ============================================================================
// Mock Function Caller
// ============================================================================

/// Function caller returning a fixed value and recording calls
#[allow(dead_code)]
pub struct MockFunctionCaller {
    output: Value,
    pub calls: Mutex<Vec<(String, Value)>>,
}

#[allow(dead_code)]
impl MockFunctionCaller {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FunctionCaller for MockFunctionCaller {
    async fn call(&self, name: &str, arguments: Value) -> Result<Value, String> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        Ok(self.output.clone())
    }
}
