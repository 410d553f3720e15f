//! Chat and message models plus their persisted wire layout.
//!
//! Field and collection names match the store schema the mobile client
//! shipped with, so a reimplemented client can read existing data.

use chrono::{DateTime, Utc};
use docstore::Document;
use log::warn;
use serde::Serialize;

use crate::identity::SessionUser;

/// Top-level collection with one document per conversation.
pub const CHATS_COLLECTION: &str = "chats";
/// One profile document per user, keyed by user id.
pub const USERS_COLLECTION: &str = "users";

/// Per-chat message subcollection. This is the canonical message layout;
/// the flat `messages` collection from early builds is deprecated and is
/// neither read nor written.
pub fn messages_collection(chat_id: &str) -> String {
    format!("{CHATS_COLLECTION}/{chat_id}/messages")
}

/// Persisted field names.
pub mod fields {
    pub const KIND: &str = "type";
    pub const NAME: &str = "name";
    pub const CODE: &str = "code";
    pub const MEMBERS: &str = "members";
    pub const MEMBER_HANDLES: &str = "memberEmails";
    pub const CREATED_BY: &str = "createdBy";
    pub const CREATED_AT: &str = "createdAt";

    pub const TEXT: &str = "text";
    pub const AUTHOR_ID: &str = "userId";
    pub const AUTHOR_HANDLE: &str = "userName";
    pub const MEDIA_URL: &str = "mediaUrl";
    pub const MEDIA_KIND: &str = "mediaType";

    pub const DISPLAY_NAME: &str = "displayName";
    pub const EMAIL: &str = "email";
    pub const NICKNAMES: &str = "nicknames";
    pub const CHAT_BACKGROUNDS: &str = "chatBackgrounds";
    pub const CHAT_BACKGROUND_IMAGES: &str = "chatBackgroundImages";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChatKind {
    Group,
    DirectMessage,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Group => "group",
            ChatKind::DirectMessage => "dm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(ChatKind::Group),
            "dm" => Some(ChatKind::DirectMessage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chat {
    pub id: String,
    pub kind: ChatKind,
    /// Group name, or the handle the DM was opened against.
    pub name: String,
    /// Join code, present for groups only.
    pub code: Option<String>,
    pub member_ids: Vec<String>,
    /// Exactly two normalized handles for DMs, empty for groups.
    pub member_handles: Vec<String>,
    pub created_by: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Chat {
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let kind = doc
            .str_field(fields::KIND)
            .ok_or(DecodeError::MissingField(fields::KIND))?;
        let kind = ChatKind::parse(kind).ok_or_else(|| DecodeError::UnknownKind(kind.to_string()))?;
        Ok(Chat {
            id: doc.id.clone(),
            kind,
            name: doc
                .str_field(fields::NAME)
                .ok_or(DecodeError::MissingField(fields::NAME))?
                .to_string(),
            code: doc.str_field(fields::CODE).map(str::to_string),
            member_ids: doc
                .array_field(fields::MEMBERS)
                .ok_or(DecodeError::MissingField(fields::MEMBERS))?
                .to_vec(),
            member_handles: doc
                .array_field(fields::MEMBER_HANDLES)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            created_by: doc
                .str_field(fields::CREATED_BY)
                .ok_or(DecodeError::MissingField(fields::CREATED_BY))?
                .to_string(),
            created_at: doc.timestamp_field(fields::CREATED_AT),
        })
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }

    /// Membership test keyed by the authoritative set for the chat kind:
    /// user ids for groups, handles for DMs.
    pub fn has_member(&self, user: &SessionUser) -> bool {
        match self.kind {
            ChatKind::Group => self.member_ids.contains(&user.user_id),
            ChatKind::DirectMessage => self.member_handles.contains(&user.handle),
        }
    }

    /// The other party's handle in a DM.
    pub fn dm_counterpart(&self, my_handle: &str) -> Option<&str> {
        if self.kind != ChatKind::DirectMessage {
            return None;
        }
        self.member_handles
            .iter()
            .map(String::as_str)
            .find(|handle| *handle != my_handle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub author_handle: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Reserved media attachment fields, carried through undecoded flows.
    pub media_url: Option<String>,
    pub media_kind: Option<String>,
}

impl Message {
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        Ok(Message {
            id: doc.id.clone(),
            text: doc
                .str_field(fields::TEXT)
                .ok_or(DecodeError::MissingField(fields::TEXT))?
                .to_string(),
            author_id: doc
                .str_field(fields::AUTHOR_ID)
                .ok_or(DecodeError::MissingField(fields::AUTHOR_ID))?
                .to_string(),
            author_handle: doc
                .str_field(fields::AUTHOR_HANDLE)
                .ok_or(DecodeError::MissingField(fields::AUTHOR_HANDLE))?
                .to_string(),
            created_at: doc.timestamp_field(fields::CREATED_AT),
            media_url: doc.str_field(fields::MEDIA_URL).map(str::to_string),
            media_kind: doc.str_field(fields::MEDIA_KIND).map(str::to_string),
        })
    }
}

/// Decodes every well-formed chat in a snapshot. Malformed documents are
/// logged and excluded, never defaulted.
pub(crate) fn decode_chats(docs: &[Document]) -> Vec<Chat> {
    docs.iter()
        .filter_map(|doc| match Chat::from_document(doc) {
            Ok(chat) => Some(chat),
            Err(err) => {
                warn!("dropping malformed chat document {}: {err}", doc.id);
                None
            }
        })
        .collect()
}

pub(crate) fn decode_messages(docs: &[Document]) -> Vec<Message> {
    docs.iter()
        .filter_map(|doc| match Message::from_document(doc) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!("dropping malformed message document {}: {err}", doc.id);
                None
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Missing field `{0}`")]
    MissingField(&'static str),
    #[error("Unknown chat kind `{0}`")]
    UnknownKind(String),
}
