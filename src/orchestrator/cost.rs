//! Message cost lookup

use super::Assistant;
use crate::dispatch::spawn_logged;
use crate::events::SessionEvent;
use crate::ids::MessageId;
use std::sync::Arc;
use tokio::task::JoinHandle;

impl Assistant {
    /// Look up the cost of the exchange `message_id` belongs to and publish
    /// it as `MessageCostReceived`.
    ///
    /// Cost is tracked per user message. While that message is still
    /// unacknowledged or its response is streaming the cost is reported as
    /// pending. Backend errors are only logged.
    pub fn fetch_message_cost(self: &Arc<Self>, message_id: MessageId) -> JoinHandle<()> {
        let this = self.clone();
        spawn_logged("cost lookup", async move {
            let session = &this.session;
            let user_message = session
                .store
                .get(&message_id.conversation_id)
                .and_then(|conv| conv.preceding_user_message(&message_id).map(|m| m.id.clone()));
            let Some(user_id) = user_message else {
                tracing::debug!(message_id = %message_id, "No user message precedes message");
                return Ok(());
            };

            if !user_id.is_external() || session.costs.contains(&user_id) {
                session.events.publish(SessionEvent::MessageCostReceived {
                    message_id,
                    cost: None,
                    is_pending: true,
                });
                return Ok(());
            }

            let credentials = this.fetch_credentials().await?;
            match this.backend.fetch_message_cost(&credentials, &user_id).await {
                Ok(cost) => {
                    session.events.publish(SessionEvent::MessageCostReceived {
                        message_id,
                        cost,
                        is_pending: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(message_id = %message_id, error = %e, "Failed to fetch message cost");
                }
            }
            Ok(())
        })
    }
}
