//! Conversation lookup, creation, and membership.
//!
//! Groups are joined by code; direct messages are deduplicated per
//! unordered handle pair. All membership mutations go through the store's
//! atomic array-union, so concurrent joins commute.

use std::sync::Arc;

use docstore::{
    DocumentStore, FieldUpdate, FieldValue, Fields, Query, StoreError, Subscription,
};
use log::debug;
use rand::{thread_rng, Rng};

use crate::chat::{self, fields, Chat, ChatKind, CHATS_COLLECTION};
use crate::identity::{normalize_handle, IdentityProvider, SessionUser};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Join codes are always this long.
pub const CODE_LENGTH: usize = 10;

/// Codes are unique by convention only; generation does not check the
/// store for collisions.
fn generate_code() -> String {
    let mut rng = thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Live feed of chats matching one directory query. Malformed chat
/// documents are logged and excluded from every snapshot.
pub struct ChatFeed {
    inner: Subscription,
}

impl ChatFeed {
    /// Next membership snapshot. Store errors come through as recoverable
    /// `QueryFailed` items; the feed itself stays open.
    pub async fn next(&mut self) -> Option<Result<Vec<Chat>, DirectoryError>> {
        match self.inner.next().await? {
            Ok(docs) => Some(Ok(chat::decode_chats(&docs))),
            Err(err) => Some(Err(DirectoryError::QueryFailed(err))),
        }
    }

    /// Releases the underlying subscription. Feeds are not cleaned up on
    /// drop; callers release them at the end of the view lifetime.
    pub fn release(self) {
        self.inner.release();
    }
}

pub struct ChatDirectory {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl ChatDirectory {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        ChatDirectory { store, identity }
    }

    fn current_user(&self) -> Result<SessionUser, DirectoryError> {
        self.identity
            .current_user()
            .ok_or(DirectoryError::Unauthenticated)
    }

    /// Live feed of groups the signed-in user is a member of.
    pub async fn groups(&self) -> Result<ChatFeed, DirectoryError> {
        let user = self.current_user()?;
        let query = Query::collection(CHATS_COLLECTION)
            .field_equals(
                fields::KIND,
                FieldValue::String(ChatKind::Group.as_str().to_string()),
            )
            .array_contains(fields::MEMBERS, user.user_id);
        let inner = self
            .store
            .subscribe(query)
            .await
            .map_err(DirectoryError::QueryFailed)?;
        Ok(ChatFeed { inner })
    }

    /// Live feed of direct messages whose handle set contains the
    /// signed-in user's handle.
    pub async fn direct_messages(&self) -> Result<ChatFeed, DirectoryError> {
        let user = self.current_user()?;
        let inner = self
            .store
            .subscribe(dm_query(&user.handle))
            .await
            .map_err(DirectoryError::QueryFailed)?;
        Ok(ChatFeed { inner })
    }

    /// Creates a group with the signed-in user as its only member and
    /// returns the join code, which is the sole distribution channel for
    /// group membership.
    pub async fn create_group(&self, name: &str) -> Result<String, DirectoryError> {
        let user = self.current_user()?;
        let code = generate_code();

        let mut doc = Fields::new();
        doc.insert(
            fields::KIND.into(),
            FieldValue::String(ChatKind::Group.as_str().to_string()),
        );
        doc.insert(fields::NAME.into(), FieldValue::String(name.to_string()));
        doc.insert(fields::CODE.into(), FieldValue::String(code.clone()));
        doc.insert(
            fields::MEMBERS.into(),
            FieldValue::StringArray(vec![user.user_id.clone()]),
        );
        doc.insert(fields::CREATED_BY.into(), FieldValue::String(user.user_id));
        doc.insert(fields::CREATED_AT.into(), FieldValue::ServerTimestamp);

        let chat_id = self
            .store
            .add_document(CHATS_COLLECTION, doc)
            .await
            .map_err(DirectoryError::WriteFailed)?;
        debug!("created group {name} ({chat_id})");
        Ok(code)
    }

    /// Adds the signed-in user to the group matching `code`. Re-joining is
    /// a no-op, not an error: the membership mutation is a set-union.
    pub async fn join_group(&self, code: &str) -> Result<Chat, DirectoryError> {
        let user = self.current_user()?;
        let code = code.trim().to_uppercase();

        let query = Query::collection(CHATS_COLLECTION)
            .field_equals(fields::CODE, FieldValue::String(code.clone()))
            .field_equals(
                fields::KIND,
                FieldValue::String(ChatKind::Group.as_str().to_string()),
            );
        let docs = self
            .store
            .get_documents(&query)
            .await
            .map_err(DirectoryError::QueryFailed)?;
        let doc = docs.first().ok_or(DirectoryError::CodeNotFound(code))?;

        let mut joined = Chat::from_document(doc)?;
        self.store
            .update_document(
                CHATS_COLLECTION,
                &doc.id,
                vec![FieldUpdate::ArrayUnion {
                    field: fields::MEMBERS.into(),
                    values: vec![user.user_id.clone()],
                }],
            )
            .await
            .map_err(DirectoryError::WriteFailed)?;

        if !joined.member_ids.contains(&user.user_id) {
            joined.member_ids.push(user.user_id);
        }
        debug!("user joined group {}", joined.id);
        Ok(joined)
    }

    /// Opens the direct message with `target_handle`, reusing the existing
    /// thread for the pair when one exists.
    ///
    /// Two users starting the same DM concurrently can both pass the
    /// dedup scan before either write lands and end up with two threads
    /// for the pair. The store offers no check-then-write, so that race
    /// stands; sequential calls always converge on one thread.
    pub async fn start_dm(&self, target_handle: &str) -> Result<Chat, DirectoryError> {
        let user = self.current_user()?;
        let target = normalize_handle(target_handle);
        if target == user.handle {
            return Err(DirectoryError::SelfDmRejected);
        }

        let query = dm_query(&user.handle);
        let docs = self
            .store
            .get_documents(&query)
            .await
            .map_err(DirectoryError::QueryFailed)?;
        if let Some(existing) = find_dm_with(&docs, &target) {
            return Ok(existing);
        }

        let mut doc = Fields::new();
        doc.insert(
            fields::KIND.into(),
            FieldValue::String(ChatKind::DirectMessage.as_str().to_string()),
        );
        doc.insert(fields::NAME.into(), FieldValue::String(target.clone()));
        doc.insert(
            fields::MEMBER_HANDLES.into(),
            FieldValue::StringArray(vec![user.handle.clone(), target.clone()]),
        );
        doc.insert(
            fields::MEMBERS.into(),
            FieldValue::StringArray(vec![user.user_id.clone()]),
        );
        doc.insert(fields::CREATED_BY.into(), FieldValue::String(user.user_id));
        doc.insert(fields::CREATED_AT.into(), FieldValue::ServerTimestamp);

        self.store
            .add_document(CHATS_COLLECTION, doc)
            .await
            .map_err(DirectoryError::WriteFailed)?;

        // Read-after-write is not guaranteed to be atomic, so the new
        // thread is confirmed with a second lookup instead of being
        // returned from local state.
        let docs = self
            .store
            .get_documents(&query)
            .await
            .map_err(DirectoryError::QueryFailed)?;
        find_dm_with(&docs, &target).ok_or(DirectoryError::DmNotVisible)
    }

    /// Replaces the group's join code. The old code becomes invalid
    /// immediately, with no grace period.
    pub async fn regenerate_code(&self, chat_id: &str) -> Result<String, DirectoryError> {
        self.current_user()?;
        let code = generate_code();
        self.store
            .update_document(
                CHATS_COLLECTION,
                chat_id,
                vec![FieldUpdate::Set {
                    field: fields::CODE.into(),
                    value: FieldValue::String(code.clone()),
                }],
            )
            .await
            .map_err(DirectoryError::WriteFailed)?;
        debug!("regenerated join code for {chat_id}");
        Ok(code)
    }
}

fn dm_query(handle: &str) -> Query {
    Query::collection(CHATS_COLLECTION)
        .field_equals(
            fields::KIND,
            FieldValue::String(ChatKind::DirectMessage.as_str().to_string()),
        )
        .array_contains(fields::MEMBER_HANDLES, handle)
}

/// In-memory scan of a DM result set for the thread with `target`.
fn find_dm_with(docs: &[docstore::Document], target: &str) -> Option<Chat> {
    chat::decode_chats(docs)
        .into_iter()
        .find(|chat| chat.member_handles.iter().any(|handle| handle == target))
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("No signed-in user")]
    Unauthenticated,
    #[error("You cannot start a direct message with yourself")]
    SelfDmRejected,
    #[error("No group matches the code {0}")]
    CodeNotFound(String),
    #[error("Direct message was created but is not visible yet")]
    DmNotVisible,
    #[error("Stored chat document is malformed: {0}")]
    MalformedChat(#[from] crate::chat::DecodeError),
    #[error("Chat lookup failed: {0}")]
    QueryFailed(StoreError),
    #[error("Chat write failed: {0}")]
    WriteFailed(StoreError),
}
