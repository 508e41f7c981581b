//! In-memory conversation store
//!
//! Process-lifetime map from conversation id to conversation record. The
//! store is a cheap cloneable handle; mutation is expected to happen on the
//! main execution context (see [`crate::dispatch`]).

mod model;

pub use model::*;

use crate::ids::{ConversationId, IdAllocator, MessageId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe conversation store handle
#[derive(Clone, Default)]
pub struct MessageStore {
    conversations: Arc<Mutex<HashMap<ConversationId, Conversation>>>,
    ids: Arc<IdAllocator>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_internal_id(&self, conversation_id: &ConversationId) -> MessageId {
        self.ids.next_internal(conversation_id)
    }

    pub fn next_incomplete_id(&self, conversation_id: &ConversationId) -> MessageId {
        self.ids.next_incomplete(conversation_id)
    }

    // ==================== Conversation Operations ====================

    /// Snapshot of a conversation
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.lock().keys().cloned().collect()
    }

    /// Create an empty conversation if absent. Returns true if created.
    pub fn ensure(&self, id: &ConversationId) -> bool {
        let mut conversations = self.lock();
        if conversations.contains_key(id) {
            return false;
        }
        conversations.insert(id.clone(), Conversation::new(id.clone()));
        true
    }

    /// Insert or replace a whole conversation
    pub fn insert(&self, conversation: Conversation) {
        self.lock().insert(conversation.id.clone(), conversation);
    }

    pub fn remove(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().remove(id)
    }

    /// Mutate a conversation in place
    pub fn update<R>(
        &self,
        id: &ConversationId,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    // ==================== Message Operations ====================

    /// Append a message, fixing its index. Returns the index.
    pub fn append(&self, id: &ConversationId, mut message: Message) -> Option<usize> {
        self.update(id, |conv| {
            let index = conv.messages.len();
            message.message_index = index;
            conv.messages.push(message);
            index
        })
    }

    /// Append an incomplete assistant placeholder.
    ///
    /// Any incomplete message already present is sealed first so at most one
    /// placeholder exists per conversation.
    pub fn append_placeholder(&self, id: &ConversationId, message_id: MessageId) -> Option<usize> {
        let ids = self.ids.clone();
        self.update(id, |conv| {
            for stale in conv.messages.iter_mut().filter(|m| !m.is_complete) {
                tracing::warn!(
                    conversation_id = %conv.id,
                    message_id = %stale.id,
                    "Sealing abandoned incomplete message"
                );
                seal(stale, &ids, None);
            }
            let index = conv.messages.len();
            let mut placeholder = Message::placeholder(message_id);
            placeholder.message_index = index;
            conv.messages.push(placeholder);
            index
        })
    }

    /// Mutate one message in place
    pub fn update_message<R>(
        &self,
        id: &MessageId,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        self.update(&id.conversation_id, |conv| conv.message_mut(id).map(f))
            .flatten()
    }

    /// Mark a message complete, stamping time and final position.
    ///
    /// With `external_id` the message is promoted to that backend id; an
    /// unacknowledged placeholder is re-keyed as internal. Returns the final
    /// id, or `None` if the message is missing or was already complete.
    pub fn complete_message(&self, id: &MessageId, external_id: Option<&str>) -> Option<MessageId> {
        let ids = self.ids.clone();
        self.update(&id.conversation_id, |conv| {
            let index = conv.position(id)?;
            let message = &mut conv.messages[index];
            if message.is_complete {
                return None;
            }
            seal(message, &ids, external_id);
            message.message_index = index;
            Some(message.id.clone())
        })
        .flatten()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.lock()
            .get(&id.conversation_id)
            .and_then(|conv| conv.message(id).cloned())
    }

    pub fn last_message(&self, id: &ConversationId) -> Option<Message> {
        self.lock()
            .get(id)
            .and_then(|conv| conv.messages.last().cloned())
    }

    pub fn set_title(&self, id: &ConversationId, title: impl Into<String>) -> bool {
        let title = title.into();
        self.update(id, |conv| conv.title = title).is_some()
    }
}

fn seal(message: &mut Message, ids: &IdAllocator, external_id: Option<&str>) {
    let conversation_id = message.id.conversation_id.clone();
    if let Some(external) = external_id {
        message.id = MessageId::external(conversation_id, external);
    } else if message.id.is_incomplete() {
        message.id = ids.next_internal(&conversation_id);
    }
    message.is_complete = true;
    message.timestamp = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::new("c1")
    }

    fn ext(n: &str) -> MessageId {
        MessageId::external(conv(), n)
    }

    #[test]
    fn test_ensure_creates_once() {
        let store = MessageStore::new();
        assert!(store.ensure(&conv()));
        assert!(!store.ensure(&conv()));
        assert!(store.contains(&conv()));
    }

    #[test]
    fn test_append_fixes_index() {
        let store = MessageStore::new();
        store.ensure(&conv());

        assert_eq!(store.append(&conv(), Message::user(ext("u"), "hi", vec![])), Some(0));
        assert_eq!(store.append_placeholder(&conv(), ext("a")), Some(1));

        let stored = store.get(&conv()).unwrap();
        assert_eq!(stored.messages[1].message_index, 1);
        assert!(!stored.messages[1].is_complete);
    }

    #[test]
    fn test_append_to_missing_conversation() {
        let store = MessageStore::new();
        assert_eq!(store.append(&conv(), Message::user(ext("u"), "hi", vec![])), None);
    }

    #[test]
    fn test_placeholder_seals_previous_incomplete() {
        let store = MessageStore::new();
        store.ensure(&conv());
        let first = store.next_incomplete_id(&conv());
        let second = store.next_incomplete_id(&conv());
        store.append_placeholder(&conv(), first.clone());
        store.append_placeholder(&conv(), second.clone());

        let stored = store.get(&conv()).unwrap();
        assert_eq!(stored.incomplete_count(), 1);
        assert!(stored.message(&first).is_none(), "sealed placeholder is re-keyed");
        assert!(stored.messages[0].is_complete);
        assert!(!stored.messages[0].id.is_incomplete());
        assert!(!stored.message(&second).unwrap().is_complete);
    }

    #[test]
    fn test_complete_message_promotes_to_external() {
        let store = MessageStore::new();
        store.ensure(&conv());
        let placeholder = store.next_incomplete_id(&conv());
        store.append_placeholder(&conv(), placeholder.clone());

        let final_id = store.complete_message(&placeholder, Some("srv-1")).unwrap();
        assert_eq!(final_id, ext("srv-1"));
        assert!(store.message(&final_id).unwrap().is_complete);
        assert!(store.complete_message(&final_id, None).is_none());
    }

    #[test]
    fn test_complete_message_without_ack_becomes_internal() {
        let store = MessageStore::new();
        store.ensure(&conv());
        let placeholder = store.next_incomplete_id(&conv());
        store.append_placeholder(&conv(), placeholder.clone());

        let final_id = store.complete_message(&placeholder, None).unwrap();
        assert_eq!(final_id.kind, crate::ids::MessageIdKind::Internal);
        assert!(store.complete_message(&ext("missing"), None).is_none());
    }
}
