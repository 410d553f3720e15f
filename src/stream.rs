//! Per-chat ordered message log with live delivery.
//!
//! A subscription covers the chat's entire history; there is no
//! pagination or backfill limit, which is a known ceiling for large
//! conversations. Senders do no optimistic insertion: a sent message
//! becomes visible through the sender's own subscription once the store
//! echoes it back.

use std::sync::Arc;

use docstore::{Direction, DocumentStore, FieldValue, Fields, Query, StoreError, Subscription};

use crate::chat::{self, fields, Message};
use crate::identity::IdentityProvider;

/// Live feed of one chat's messages, ordered by creation time ascending
/// with store insertion order breaking ties. Malformed message documents
/// are logged and excluded.
pub struct MessageFeed {
    inner: Subscription,
}

impl MessageFeed {
    pub async fn next(&mut self) -> Option<Result<Vec<Message>, StreamError>> {
        match self.inner.next().await? {
            Ok(docs) => Some(Ok(chat::decode_messages(&docs))),
            Err(err) => Some(Err(StreamError::QueryFailed(err))),
        }
    }

    /// Releases the underlying subscription; part of the contract, not
    /// done on drop.
    pub fn release(self) {
        self.inner.release();
    }
}

pub struct MessageStream {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl MessageStream {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        MessageStream { store, identity }
    }

    pub async fn subscribe(&self, chat_id: &str) -> Result<MessageFeed, StreamError> {
        let query = Query::collection(chat::messages_collection(chat_id))
            .order_by(fields::CREATED_AT, Direction::Ascending);
        let inner = self
            .store
            .subscribe(query)
            .await
            .map_err(StreamError::QueryFailed)?;
        Ok(MessageFeed { inner })
    }

    /// Appends a message with a server-assigned timestamp. Messages are
    /// immutable once written. Text is required until media attachments
    /// are wired up.
    pub async fn send(&self, chat_id: &str, text: &str) -> Result<(), StreamError> {
        let user = self
            .identity
            .current_user()
            .ok_or(StreamError::Unauthenticated)?;
        if text.is_empty() {
            return Err(StreamError::EmptyMessage);
        }

        let mut doc = Fields::new();
        doc.insert(fields::TEXT.into(), FieldValue::String(text.to_string()));
        doc.insert(fields::AUTHOR_ID.into(), FieldValue::String(user.user_id));
        doc.insert(
            fields::AUTHOR_HANDLE.into(),
            FieldValue::String(user.handle),
        );
        doc.insert(fields::CREATED_AT.into(), FieldValue::ServerTimestamp);

        self.store
            .add_document(&chat::messages_collection(chat_id), doc)
            .await
            .map_err(StreamError::WriteFailed)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("You must be signed in to send a message")]
    Unauthenticated,
    #[error("Cannot send an empty message")]
    EmptyMessage,
    #[error("Message lookup failed: {0}")]
    QueryFailed(StoreError),
    #[error("Message write failed: {0}")]
    WriteFailed(StoreError),
}
