//! Prompt submission and acknowledgement

use super::{parse_command, Assistant};
use crate::backend::CredentialsContext;
use crate::dispatch::{invoke, spawn_logged};
use crate::error::{ErrorInfo, SessionError, SessionResult};
use crate::events::{PromptState, SessionEvent};
use crate::handler::{HandlerBinding, WorkflowEventHandler};
use crate::ids::{ConversationId, MessageId};
use crate::session::Session;
use crate::store::{Block, ContextEntry, Message};
use crate::workflow::{
    AcknowledgeInfo, AgentRef, AttachedContext, ChatMode, ChatRequest, ChatWorkflow,
    WorkflowEvent,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// User input for one submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub attachments: Vec<ContextEntry>,
}

impl Prompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, entry: ContextEntry) -> Self {
        self.attachments.push(entry);
        self
    }
}

/// Everything the background half of a submission needs
struct Submission {
    conversation_id: ConversationId,
    text: String,
    attached: SessionResult<AttachedContext>,
    agent: Option<AgentRef>,
    mode: ChatMode,
    cancel: CancellationToken,
}

impl Assistant {
    /// Submit a prompt to `conversation_id` (unassigned starts a new
    /// conversation).
    ///
    /// Truncation, context serialization and the move to `Connecting` happen
    /// before this returns; the network exchange continues on the returned
    /// task. Failures are reported through `ConversationErrorOccurred`.
    pub fn process_prompt(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        prompt: Prompt,
        agent: Option<AgentRef>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        self.submit(conversation_id, prompt, agent, ChatMode::Interactive, &cancel)
    }

    pub(crate) fn submit(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        prompt: Prompt,
        agent: Option<AgentRef>,
        mode: ChatMode,
        cancel: &CancellationToken,
    ) -> JoinHandle<()> {
        let max = self.session.config.max_prompt_length;
        let text = truncate_chars(&prompt.text, max);
        if text.len() < prompt.text.len() {
            tracing::debug!(conversation_id = %conversation_id, max, "Prompt truncated");
        }
        let attached = self.serializer.serialize(&prompt.attachments);

        self.session
            .prompt_state
            .set(&conversation_id, PromptState::Connecting);
        let cancel = self.begin_prompt(cancel);

        let submission = Submission {
            conversation_id,
            text,
            attached,
            agent,
            mode,
            cancel,
        };
        let this = self.clone();
        spawn_logged("prompt submission", async move { this.run_submission(submission).await })
    }

    async fn run_submission(self: Arc<Self>, submission: Submission) -> SessionResult<()> {
        let requested = submission.conversation_id.clone();
        let cancel = submission.cancel.clone();

        let result = self.exchange(submission).await;
        match result {
            Ok(()) => Ok(()),
            Err(SessionError::Cancelled) => {
                // Only while no newer prompt has installed its own token
                if self.current_cancel().is_cancelled() {
                    self.session
                        .prompt_state
                        .set(&requested, PromptState::NotConnected);
                }
                Err(SessionError::Cancelled)
            }
            Err(e) if cancel.is_cancelled() => {
                tracing::debug!(conversation_id = %requested, error = %e, "Prompt failed after cancellation");
                Ok(())
            }
            Err(e) => {
                self.fail_prompt(&requested, prompt_error(&e));
                Err(e)
            }
        }
    }

    async fn exchange(self: &Arc<Self>, submission: Submission) -> SessionResult<()> {
        let Submission {
            conversation_id: requested,
            text,
            attached,
            agent,
            mode,
            cancel,
        } = submission;
        let attached = attached?;
        let is_new_conversation = !requested.is_valid();

        let (credentials, workflow) = self.connect(&requested, &cancel).await?;

        let conversation_id = workflow.conversation_id();
        if !conversation_id.is_valid() {
            return Err(SessionError::InvalidConversation(conversation_id));
        }
        if self.session.store.ensure(&conversation_id) {
            self.session
                .events
                .publish(SessionEvent::ConversationCreated(conversation_id.clone()));
        }
        self.set_active(conversation_id.clone(), workflow.clone(), None);

        let untitled = self
            .session
            .store
            .get(&conversation_id)
            .is_some_and(|conv| conv.title.is_empty());
        if untitled {
            self.spawn_title_generation(conversation_id.clone(), credentials);
        }

        let (user_id, placeholder_id) = self
            .append_exchange(&conversation_id, text.clone(), attached.entries.clone())
            .await?;

        let handler = WorkflowEventHandler::bind(
            self.session.clone(),
            workflow.clone(),
            HandlerBinding {
                conversation_id: conversation_id.clone(),
                message_id: placeholder_id,
                is_new_conversation,
                cancel: cancel.clone(),
            },
        );
        self.set_active(conversation_id.clone(), workflow.clone(), Some(handler.clone()));
        self.listen_for_acknowledgement(&workflow, user_id, cancel.clone());

        if cancel.is_cancelled() {
            handler.close();
            self.abandon_placeholder(handler.message_id()).await?;
            return Err(SessionError::Cancelled);
        }

        let parsed = parse_command(&text);
        let request = ChatRequest {
            command: parsed.command,
            text: parsed.text,
            attached_context: attached,
            agent,
            mode,
        };
        tracing::info!(
            conversation_id = %conversation_id,
            command = %request.command,
            mode = ?request.mode,
            "Sending chat request"
        );

        if let Err(e) = workflow.send_chat_request(request, cancel.clone()).await {
            handler.close();
            self.abandon_placeholder(handler.message_id()).await?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Credentials, workflow and discussion handshake, each abandoned as soon
    /// as the prompt is cancelled
    async fn connect(
        &self,
        conversation_id: &ConversationId,
        cancel: &CancellationToken,
    ) -> SessionResult<(CredentialsContext, Arc<dyn ChatWorkflow>)> {
        let credentials = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            credentials = self.credentials.credentials(cancel) => credentials?,
        };

        let workflow = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            workflow = self.backend.get_or_create_workflow(
                &credentials,
                self.function_caller.clone(),
                conversation_id,
                false,
            ) => workflow?,
        };
        self.set_active(conversation_id.clone(), workflow.clone(), None);

        let initialized = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            initialized = workflow.await_discussion_initialization() => initialized,
        };

        if cancel.is_cancelled() || workflow.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if !initialized {
            let reason = workflow.close_reason().map_or_else(
                || "workflow closed during initialization".to_string(),
                |reason| reason.to_string(),
            );
            return Err(SessionError::Connection(reason));
        }
        Ok((credentials, workflow))
    }

    /// Append the user message and the streaming placeholder
    async fn append_exchange(
        &self,
        conversation_id: &ConversationId,
        text: String,
        context: Vec<ContextEntry>,
    ) -> SessionResult<(MessageId, MessageId)> {
        let session = self.session.clone();
        let conversation_id = conversation_id.clone();
        invoke(self.session.main.as_ref(), move || {
            let store = &session.store;

            let user_id = store.next_internal_id(&conversation_id);
            store
                .append(&conversation_id, Message::user(user_id.clone(), text, context))
                .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))?;
            session.events.conversation_changed(&conversation_id);

            let placeholder_id = store.next_incomplete_id(&conversation_id);
            store
                .append_placeholder(&conversation_id, placeholder_id.clone())
                .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))?;
            session.events.conversation_changed(&conversation_id);
            session.events.publish(SessionEvent::IncompleteMessageStarted {
                conversation_id: conversation_id.clone(),
                message_id: placeholder_id.clone(),
            });

            Ok((user_id, placeholder_id))
        })
        .await?
    }

    /// One-shot listener for the backend's acknowledgement of `user_id`
    fn listen_for_acknowledgement(
        &self,
        workflow: &Arc<dyn ChatWorkflow>,
        user_id: MessageId,
        cancel: CancellationToken,
    ) {
        let mut rx = workflow.subscribe();
        let session = self.session.clone();

        spawn_logged("acknowledgement", async move {
            loop {
                let received = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    received = rx.recv() => received,
                };
                match received {
                    Ok(WorkflowEvent::AcknowledgeChat(info)) => {
                        let main = session.main.clone();
                        return invoke(main.as_ref(), move || {
                            acknowledge(&session, &user_id, info)
                        })
                        .await?;
                    }
                    Ok(WorkflowEvent::Close(_)) | Err(RecvError::Closed) => return Ok(()),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(message_id = %user_id, skipped, "Acknowledgement listener lagged");
                    }
                }
            }
        });
    }
}

/// Rewrite an acknowledged user message to its backend id and echoed text.
///
/// The message keeps its position and block count. A message that is not a
/// single prompt block is rejected and reported.
pub(crate) fn acknowledge(
    session: &Session,
    user_id: &MessageId,
    info: AcknowledgeInfo,
) -> SessionResult<()> {
    let conversation_id = user_id.conversation_id.clone();
    let external_id = MessageId::external(conversation_id.clone(), info.message_id);

    let outcome = session
        .store
        .update(&conversation_id, |conv| {
            let index = conv
                .position(user_id)
                .ok_or_else(|| SessionError::MessageNotFound(user_id.clone()))?;
            let message = &mut conv.messages[index];
            if message.blocks.len() != 1 {
                return Err(SessionError::MalformedMessage {
                    id: user_id.clone(),
                    reason: format!("expected one block, found {}", message.blocks.len()),
                });
            }
            let Some(Block::Prompt { text }) = message.blocks.last_mut() else {
                return Err(SessionError::MalformedMessage {
                    id: user_id.clone(),
                    reason: "last block is not a prompt".to_string(),
                });
            };
            *text = info.content;
            message.id = external_id.clone();

            let responding = conv
                .messages
                .get(index + 1)
                .is_some_and(|reply| !reply.is_complete);
            Ok(responding)
        })
        .ok_or_else(|| SessionError::ConversationNotLoaded(conversation_id.clone()))
        .and_then(|outcome| outcome);

    match outcome {
        Ok(responding) => {
            if responding {
                session.costs.insert(external_id.clone());
            }
            tracing::debug!(message_id = %external_id, "User message acknowledged");
            session.events.conversation_changed(&conversation_id);
            Ok(())
        }
        Err(e) => {
            session.events.conversation_error(
                &conversation_id,
                ErrorInfo::new("Failed to process the message acknowledgement")
                    .with_details(e.to_string()),
            );
            Err(e)
        }
    }
}

/// User-facing description of a failed submission
fn prompt_error(error: &SessionError) -> ErrorInfo {
    match error {
        SessionError::Connection(reason) => {
            ErrorInfo::new("Unable to connect to the assistant").with_details(reason.clone())
        }
        SessionError::Backend(e) => {
            ErrorInfo::new("The assistant request failed").with_details(e.to_string())
        }
        other => ErrorInfo::from(other),
    }
}

/// First `max` chars of `text`
fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
