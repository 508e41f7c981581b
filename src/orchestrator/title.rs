//! Conversation title generation

use super::Assistant;
use crate::backend::CredentialsContext;
use crate::dispatch::{invoke, spawn_logged};
use crate::ids::ConversationId;
use std::sync::Arc;

impl Assistant {
    /// Ask the backend for a title without blocking the prompt. Only applied
    /// while the conversation is still untitled.
    pub(crate) fn spawn_title_generation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        credentials: CredentialsContext,
    ) {
        let this = self.clone();
        spawn_logged("title generation", async move {
            let raw = this
                .backend
                .conversation_generate_title(&credentials, &conversation_id)
                .await?;
            let Some(title) = sanitize_title(&raw, this.session.config.max_title_length) else {
                tracing::debug!(conversation_id = %conversation_id, "Backend returned an empty title");
                return Ok(());
            };

            let session = this.session.clone();
            invoke(this.session.main.as_ref(), move || {
                let applied = session.store.update(&conversation_id, |conv| {
                    if conv.title.is_empty() {
                        conv.title = title;
                        true
                    } else {
                        false
                    }
                });
                if applied == Some(true) {
                    tracing::info!(conversation_id = %conversation_id, "Generated conversation title");
                    session.events.conversation_changed(&conversation_id);
                }
            })
            .await
        });
    }
}

/// Clean up a generated title: trim, drop wrapping quotes, collapse
/// whitespace and cut at a word boundary. `None` if nothing is left.
pub fn sanitize_title(raw: &str, max_chars: usize) -> Option<String> {
    let unquoted = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '\u{201c}' | '\u{201d}'));
    let words: Vec<&str> = unquoted.split_whitespace().collect();
    if words.is_empty() || max_chars == 0 {
        return None;
    }

    let mut title = String::new();
    let mut len = 0;
    for word in words {
        let word_len = word.chars().count();
        let needed = if title.is_empty() { word_len } else { word_len + 1 };
        if len + needed > max_chars {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
        len += needed;
    }

    if title.is_empty() {
        // First word alone is too long
        title = unquoted.trim().chars().take(max_chars).collect();
    }
    Some(title)
}
