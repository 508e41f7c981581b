//! Shared state handed to the orchestrator and event handlers

use crate::config::AssistantConfig;
use crate::dispatch::MainContext;
use crate::events::{EventBus, PromptStateCell};
use crate::ids::{ConversationId, MessageId};
use crate::store::{CommandExecution, MessageStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything that mutates or observes the message store
pub struct Session {
    pub config: AssistantConfig,
    pub store: MessageStore,
    pub events: EventBus,
    pub prompt_state: PromptStateCell,
    pub main: Arc<dyn MainContext>,
    pub commands: CommandLog,
    pub costs: PendingCosts,
}

impl Session {
    pub fn new(config: AssistantConfig, main: Arc<dyn MainContext>) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            store: MessageStore::new(),
            prompt_state: PromptStateCell::new(events.clone()),
            events,
            main,
            commands: CommandLog::default(),
            costs: PendingCosts::default(),
        }
    }

    /// Move command executions recorded before (or while) the conversation
    /// was created into its record. Must run on the main context.
    pub fn rehydrate_command_history(&self, conversation_id: &ConversationId) {
        let mut executions = self.commands.take(&ConversationId::unassigned());
        executions.extend(self.commands.take(conversation_id));
        if executions.is_empty() {
            return;
        }
        let count = executions.len();
        let applied = self.store.update(conversation_id, |conv| {
            conv.command_history.extend(executions);
        });
        if applied.is_some() {
            tracing::debug!(conversation_id = %conversation_id, count, "Re-hydrated command history");
            self.events.conversation_changed(conversation_id);
        }
    }

    /// Clear the pending cost lookup for the exchange that produced `response`
    pub fn settle_cost(&self, response: &MessageId) {
        let user_id = self
            .store
            .get(&response.conversation_id)
            .and_then(|conv| conv.preceding_user_message(response).map(|m| m.id.clone()));
        if let Some(user_id) = user_id {
            self.costs.remove(&user_id);
        }
    }
}

/// Process-local log of command executions, keyed by conversation
#[derive(Default)]
pub struct CommandLog {
    entries: Mutex<HashMap<ConversationId, Vec<CommandExecution>>>,
}

impl CommandLog {
    pub fn record(&self, conversation_id: &ConversationId, execution: CommandExecution) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conversation_id.clone())
            .or_default()
            .push(execution);
    }

    pub fn take(&self, conversation_id: &ConversationId) -> Vec<CommandExecution> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id)
            .unwrap_or_default()
    }
}

/// User messages whose response is still streaming, so cost is not final
#[derive(Default)]
pub struct PendingCosts {
    ids: Mutex<HashSet<MessageId>>,
}

impl PendingCosts {
    pub fn insert(&self, id: MessageId) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    pub fn remove(&self, id: &MessageId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InlineMainContext;
    use chrono::Utc;

    fn execution(command: &str) -> CommandExecution {
        CommandExecution {
            message_id: None,
            command: command.to_string(),
            output: String::new(),
            succeeded: true,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_rehydrate_moves_unassigned_and_own_entries() {
        let session = Session::new(AssistantConfig::default(), Arc::new(InlineMainContext));
        let conv = ConversationId::new("c1");
        session.store.ensure(&conv);
        session.commands.record(&ConversationId::unassigned(), execution("first"));
        session.commands.record(&conv, execution("second"));
        session.commands.record(&ConversationId::new("other"), execution("ignored"));

        session.rehydrate_command_history(&conv);

        let history = session.store.get(&conv).unwrap().command_history;
        let commands: Vec<_> = history.iter().map(|e| e.command.as_str()).collect();
        assert_eq!(commands, vec!["first", "second"]);
        assert!(session.commands.take(&conv).is_empty());
        assert_eq!(session.commands.take(&ConversationId::new("other")).len(), 1);
    }
}
