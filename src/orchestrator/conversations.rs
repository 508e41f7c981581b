//! Conversation management passthroughs, feedback and command history

use super::Assistant;
use crate::backend::{ConversationRecord, ConversationSummary, Feedback, HistoryMessage, Sentiment};
use crate::dispatch::invoke;
use crate::error::{ErrorInfo, SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::ids::{ConversationId, MessageId};
use crate::store::{Block, CommandExecution, Conversation, FunctionOutcome, Message, Role};

impl Assistant {
    /// Fetch the conversation list
    pub async fn refresh_conversations(&self) -> SessionResult<Vec<ConversationSummary>> {
        let credentials = self.fetch_credentials().await?;
        let summaries = self
            .backend
            .conversation_refresh(&credentials)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to refresh conversations"))?;

        tracing::debug!(count = summaries.len(), "Conversations refreshed");
        self.session
            .events
            .publish(SessionEvent::ConversationsRefreshed(summaries.clone()));
        Ok(summaries)
    }

    /// Load a conversation's history into the store.
    ///
    /// A conversation with a response still streaming keeps its local
    /// messages; only its metadata is refreshed. Failures are reported as a
    /// conversation error.
    pub async fn load_conversation(&self, conversation_id: &ConversationId) -> SessionResult<()> {
        if !conversation_id.is_valid() {
            tracing::warn!("Load requested for an invalid conversation id");
            return Ok(());
        }

        let loaded = async {
            let credentials = self.fetch_credentials().await?;
            let record = self
                .backend
                .conversation_load(&credentials, conversation_id)
                .await?;
            conversation_from_record(record)
        }
        .await;

        let conversation = match loaded {
            Ok(conversation) => conversation,
            Err(e) => {
                self.session.events.conversation_error(
                    conversation_id,
                    ErrorInfo::new("Failed to load the conversation").with_details(e.to_string()),
                );
                return Err(e);
            }
        };

        let session = self.session.clone();
        let conversation_id = conversation_id.clone();
        invoke(self.session.main.as_ref(), move || {
            let merged = session.store.update(&conversation_id, |existing| {
                if existing.incomplete_count() > 0 {
                    existing.title.clone_from(&conversation.title);
                    existing.is_favorite = conversation.is_favorite;
                    return true;
                }
                false
            });
            if merged == Some(true) {
                tracing::debug!(conversation_id = %conversation_id, "Kept streaming conversation, refreshed metadata");
            } else {
                let history = session
                    .store
                    .get(&conversation_id)
                    .map(|c| c.command_history)
                    .unwrap_or_default();
                let mut conversation = conversation;
                conversation.command_history = history;
                session.store.insert(conversation);
            }
            tracing::info!(conversation_id = %conversation_id, "Conversation loaded");
            session
                .events
                .publish(SessionEvent::ConversationLoaded(conversation_id));
        })
        .await
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> SessionResult<()> {
        if !conversation_id.is_valid() {
            tracing::warn!("Rename requested for an invalid conversation id");
            return Ok(());
        }
        let credentials = self.fetch_credentials().await?;
        self.backend
            .conversation_rename(&credentials, conversation_id, title)
            .await?;

        if self.session.store.set_title(conversation_id, title) {
            self.session.events.conversation_changed(conversation_id);
        }
        Ok(())
    }

    pub async fn delete_conversation(&self, conversation_id: &ConversationId) -> SessionResult<()> {
        if !conversation_id.is_valid() {
            tracing::warn!("Delete requested for an invalid conversation id");
            return Ok(());
        }
        let credentials = self.fetch_credentials().await?;
        self.backend
            .conversation_delete(&credentials, conversation_id)
            .await?;

        self.session.store.remove(conversation_id);
        tracing::info!(conversation_id = %conversation_id, "Conversation deleted");
        self.session
            .events
            .publish(SessionEvent::ConversationDeleted(conversation_id.clone()));
        Ok(())
    }

    pub async fn toggle_favorite(
        &self,
        conversation_id: &ConversationId,
        is_favorite: bool,
    ) -> SessionResult<()> {
        if !conversation_id.is_valid() {
            tracing::warn!("Favorite toggle requested for an invalid conversation id");
            return Ok(());
        }
        let credentials = self.fetch_credentials().await?;
        self.backend
            .conversation_favorite_toggle(&credentials, conversation_id, is_favorite)
            .await?;

        let updated = self
            .session
            .store
            .update(conversation_id, |conv| conv.is_favorite = is_favorite);
        if updated.is_some() {
            self.session.events.conversation_changed(conversation_id);
        }
        Ok(())
    }

    /// Send message feedback. Errors are logged only.
    pub async fn send_feedback(&self, message_id: MessageId, sentiment: Sentiment, comment: String) {
        let feedback = Feedback {
            message_id,
            sentiment,
            comment,
        };
        let sent = async {
            let credentials = self.fetch_credentials().await?;
            self.backend.send_feedback(&credentials, &feedback).await?;
            Ok::<_, SessionError>(())
        }
        .await;
        if let Err(e) = sent {
            tracing::warn!(message_id = %feedback.message_id, error = %e, "Failed to send feedback");
        }
    }

    /// Feedback previously given on `message_id`, `None` on error
    pub async fn load_feedback(&self, message_id: &MessageId) -> Option<Feedback> {
        let loaded = async {
            let credentials = self.fetch_credentials().await?;
            Ok::<_, SessionError>(self.backend.load_feedback(&credentials, message_id).await?)
        }
        .await;
        loaded
            .inspect_err(|e| {
                tracing::warn!(message_id = %message_id, error = %e, "Failed to load feedback");
            })
            .ok()
            .flatten()
    }

    /// Record a command run on the user's behalf.
    ///
    /// Executions for a conversation not in the store yet (including a new,
    /// unassigned one) are held until its first response completes.
    pub fn record_command_execution(
        &self,
        conversation_id: &ConversationId,
        execution: CommandExecution,
    ) {
        let session = self.session.clone();
        let conversation_id = conversation_id.clone();
        self.session.main.dispatch(Box::new(move || {
            let mut pending = Some(execution);
            if conversation_id.is_valid() {
                session.store.update(&conversation_id, |conv| {
                    if let Some(execution) = pending.take() {
                        conv.command_history.push(execution);
                    }
                });
            }
            match pending {
                Some(execution) => session.commands.record(&conversation_id, execution),
                None => session.events.conversation_changed(&conversation_id),
            }
        }));
    }

    /// Ask the backend to re-run an edited command from `message_id`
    pub async fn edit_run_command(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        command: String,
    ) -> SessionResult<()> {
        if !conversation_id.is_valid() {
            return Err(SessionError::InvalidConversation(conversation_id.clone()));
        }
        let workflow = match self.active_workflow(conversation_id) {
            Some(workflow) => workflow,
            None => {
                let credentials = self.fetch_credentials().await?;
                self.backend
                    .get_or_create_workflow(
                        &credentials,
                        self.function_caller.clone(),
                        conversation_id,
                        true,
                    )
                    .await?
            }
        };
        workflow
            .send_edit_run_command_request(message_id, command)
            .await?;
        Ok(())
    }
}

/// Convert a backend record into a store conversation.
///
/// History messages are complete and keep their backend ids. An unknown
/// role fails the whole conversion.
pub fn conversation_from_record(record: ConversationRecord) -> SessionResult<Conversation> {
    let mut conversation = Conversation::new(record.id.clone());
    conversation.title = record.title;
    conversation.is_favorite = record.is_favorite;

    for (index, history) in record.messages.into_iter().enumerate() {
        let mut message = history_message(&record.id, history)?;
        message.message_index = index;
        conversation.messages.push(message);
    }
    Ok(conversation)
}

fn history_message(conversation_id: &ConversationId, history: HistoryMessage) -> SessionResult<Message> {
    let role: Role = history.role.parse()?;
    let id = MessageId::external(conversation_id.clone(), history.id);

    let blocks = match role {
        Role::User => vec![Block::prompt(history.content)],
        Role::Assistant | Role::System => {
            let mut blocks: Vec<Block> = history
                .function_calls
                .into_iter()
                .map(|call| Block::FunctionCall {
                    outcome: call.output.map(|output| FunctionOutcome {
                        output,
                        is_error: call.is_error,
                    }),
                    call_id: call.call_id,
                    name: call.name,
                    arguments: call.arguments,
                })
                .collect();
            if !history.content.is_empty() {
                blocks.push(Block::response(history.content));
            }
            blocks
        }
    };

    Ok(Message {
        id,
        role,
        timestamp: history.timestamp,
        is_complete: true,
        message_index: 0,
        context: history.context,
        blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HistoryFunctionCall;
    use chrono::Utc;
    use serde_json::json;

    fn history(id: &str, role: &str, content: &str) -> HistoryMessage {
        HistoryMessage {
            id: id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            context: vec![],
            function_calls: vec![],
        }
    }

    fn record(messages: Vec<HistoryMessage>) -> ConversationRecord {
        ConversationRecord {
            id: ConversationId::new("c1"),
            title: "Lighting".to_string(),
            is_favorite: true,
            messages,
        }
    }

    #[test]
    fn test_history_conversion() {
        let mut reply = history("m2", "assistant", "Done.");
        reply.function_calls.push(HistoryFunctionCall {
            call_id: "call-1".to_string(),
            name: "bake_lighting".to_string(),
            arguments: json!({}),
            output: Some(json!("ok")),
            is_error: false,
        });
        let conversation =
            conversation_from_record(record(vec![history("m1", "user", "Bake it"), reply])).unwrap();

        assert_eq!(conversation.title, "Lighting");
        assert!(conversation.is_favorite);
        assert_eq!(conversation.messages.len(), 2);

        let user = &conversation.messages[0];
        assert_eq!(user.role, Role::User);
        assert!(user.id.is_external());
        assert_eq!(user.blocks, vec![Block::prompt("Bake it")]);

        let assistant = &conversation.messages[1];
        assert_eq!(assistant.message_index, 1);
        assert!(assistant.is_complete);
        assert_eq!(assistant.blocks.len(), 2);
        assert!(matches!(&assistant.blocks[0], Block::FunctionCall { outcome: Some(_), .. }));
        assert_eq!(assistant.text(), "Done.");
    }

    #[test]
    fn test_unsupported_role_fails_conversion() {
        let err = conversation_from_record(record(vec![
            history("m1", "user", "hi"),
            history("m2", "tool", "{}"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedRole(role) if role == "tool"));
    }
}
