//! Ranked "recent conversations" preview.

use std::sync::Arc;
use std::time::Duration;

use docstore::{Direction, DocumentStore, FieldValue, Query, StoreError};
use futures::future::join_all;
use log::warn;
use serde::Serialize;

use crate::chat::{self, fields, Chat, ChatKind, CHATS_COLLECTION};
use crate::identity::IdentityProvider;

/// At most this many conversations are previewed, in arrival order (not
/// recency-sorted).
pub const RECENT_LIMIT: usize = 5;

/// Upper bound on the last-message fan-out. The original client had none
/// and could hang indefinitely on partial network failure.
pub const FANOUT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentChat {
    pub chat: Chat,
    /// Text of the newest message, empty when the chat has none.
    pub last_message: String,
}

pub struct RecentActivity {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl RecentActivity {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        RecentActivity { store, identity }
    }

    /// The user's conversations with last-message snippets. Zero chats
    /// yields an empty list, not an error.
    pub async fn recent_chats(&self) -> Result<Vec<RecentChat>, RecentError> {
        let user = self
            .identity
            .current_user()
            .ok_or(RecentError::Unauthenticated)?;

        // Membership by user id first; the query deliberately carries no
        // kind filter, so it also picks up DMs the user created.
        let member_query =
            Query::collection(CHATS_COLLECTION).array_contains(fields::MEMBERS, user.user_id);
        let docs = self
            .store
            .get_documents(&member_query)
            .await
            .map_err(RecentError::QueryFailed)?;
        let mut chats = chat::decode_chats(&docs);

        let dm_query = Query::collection(CHATS_COLLECTION)
            .field_equals(
                fields::KIND,
                FieldValue::String(ChatKind::DirectMessage.as_str().to_string()),
            )
            .array_contains(fields::MEMBER_HANDLES, user.handle);
        let docs = self
            .store
            .get_documents(&dm_query)
            .await
            .map_err(RecentError::QueryFailed)?;
        for dm in chat::decode_chats(&docs) {
            if !chats.iter().any(|existing| existing.id == dm.id) {
                chats.push(dm);
            }
        }

        chats.truncate(RECENT_LIMIT);
        if chats.is_empty() {
            return Ok(Vec::new());
        }

        // Join-barrier: every per-chat lookup completes, in any order,
        // before the preview list is produced.
        let previews = join_all(chats.iter().map(|chat| self.last_message(&chat.id)));
        let previews = tokio::time::timeout(FANOUT_TIMEOUT, previews)
            .await
            .map_err(|_| RecentError::Timeout)?;

        Ok(chats
            .into_iter()
            .zip(previews)
            .map(|(chat, last_message)| RecentChat { chat, last_message })
            .collect())
    }

    /// Newest message text for one chat. Failures degrade to an empty
    /// preview rather than failing the whole list.
    async fn last_message(&self, chat_id: &str) -> String {
        let query = Query::collection(chat::messages_collection(chat_id))
            .order_by(fields::CREATED_AT, Direction::Descending)
            .limit(1);
        match self.store.get_documents(&query).await {
            Ok(docs) => docs
                .first()
                .and_then(|doc| doc.str_field(fields::TEXT))
                .unwrap_or_default()
                .to_string(),
            Err(err) => {
                warn!("last-message lookup for {chat_id} failed: {err}");
                String::new()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecentError {
    #[error("No signed-in user")]
    Unauthenticated,
    #[error("Chat lookup failed: {0}")]
    QueryFailed(StoreError),
    #[error("Last-message fan-out timed out")]
    Timeout,
}
