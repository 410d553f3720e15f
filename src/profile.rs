//! Per-user display identity and per-chat cosmetic preferences.
//!
//! The profile document is created lazily on first write and updated with
//! field-level partial merges: writing the nickname map never touches the
//! background maps and vice versa, so concurrent edits of different
//! preferences are last-writer-wins per field, not per document.

use std::collections::BTreeMap;
use std::sync::Arc;

use docstore::{DocumentStore, FieldValue, Fields, Query, StoreError};
use tokio::sync::RwLock;

use crate::chat::{fields, USERS_COLLECTION};
use crate::identity::{handle_local_part, normalize_handle, IdentityProvider, SessionUser};

/// Named background tokens selectable per chat. `"image"` marks a custom
/// background image; when both an image path and a color token are set
/// for a chat, the image wins at display time only.
pub const BACKGROUND_OPTIONS: &[&str] = &[
    "default", "blue", "purple", "green", "orange", "pink", "gray", "image",
];

/// What a chat should be drawn on, after applying display precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatBackground {
    Default,
    Color(String),
    Image(String),
}

#[derive(Debug, Default)]
struct ProfileState {
    display_name: String,
    /// Target key (chat id for groups, normalized handle for DMs) to
    /// nickname. Absence means "use default".
    nicknames: BTreeMap<String, String>,
    chat_backgrounds: BTreeMap<String, String>,
    chat_background_images: BTreeMap<String, String>,
    /// Handle to display name, read-through cache of remote lookups.
    display_names: BTreeMap<String, String>,
}

pub struct ProfileStore {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    state: RwLock<ProfileState>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        ProfileStore {
            store,
            identity,
            state: RwLock::new(ProfileState::default()),
        }
    }

    fn current_user(&self) -> Result<SessionUser, ProfileError> {
        self.identity
            .current_user()
            .ok_or(ProfileError::Unauthenticated)
    }

    /// Loads the signed-in user's profile document. A missing document is
    /// not an error; the profile comes into existence on first write.
    pub async fn load(&self) -> Result<(), ProfileError> {
        let user = self.current_user()?;
        let doc = self
            .store
            .get_document(USERS_COLLECTION, &user.user_id)
            .await
            .map_err(ProfileError::QueryFailed)?;
        let Some(doc) = doc else {
            return Ok(());
        };

        let mut state = self.state.write().await;
        state.display_name = doc
            .str_field(fields::DISPLAY_NAME)
            .unwrap_or_default()
            .to_string();
        state.nicknames = doc.map_field(fields::NICKNAMES).cloned().unwrap_or_default();
        state.chat_backgrounds = doc
            .map_field(fields::CHAT_BACKGROUNDS)
            .cloned()
            .unwrap_or_default();
        state.chat_background_images = doc
            .map_field(fields::CHAT_BACKGROUND_IMAGES)
            .cloned()
            .unwrap_or_default();
        Ok(())
    }

    /// Partial merge of one map field; sibling preference fields on the
    /// profile document are never clobbered.
    async fn merge_map(
        &self,
        field: &'static str,
        map: &BTreeMap<String, String>,
    ) -> Result<(), ProfileError> {
        let user = self.current_user()?;
        let mut doc = Fields::new();
        doc.insert(field.to_string(), FieldValue::StringMap(map.clone()));
        self.store
            .merge_document(USERS_COLLECTION, &user.user_id, doc)
            .await
            .map_err(ProfileError::WriteFailed)
    }

    pub async fn display_name(&self) -> String {
        self.state.read().await.display_name.clone()
    }

    /// Saves the chosen display name and, alongside it, the handle other
    /// users resolve display names by.
    pub async fn save_display_name(&self, name: &str) -> Result<(), ProfileError> {
        let user = self.current_user()?;
        let mut doc = Fields::new();
        doc.insert(
            fields::DISPLAY_NAME.into(),
            FieldValue::String(name.to_string()),
        );
        doc.insert(fields::EMAIL.into(), FieldValue::String(user.handle.clone()));
        self.store
            .merge_document(USERS_COLLECTION, &user.user_id, doc)
            .await
            .map_err(ProfileError::WriteFailed)?;
        self.state.write().await.display_name = name.to_string();
        Ok(())
    }

    /// The signed-in user's own display name: the chosen one when set,
    /// otherwise the handle's local part, otherwise "guest".
    pub async fn my_display_name(&self) -> String {
        let display_name = self.display_name().await;
        if !display_name.is_empty() {
            return display_name;
        }
        match self.identity.current_user() {
            Some(user) => handle_local_part(&user.handle).to_string(),
            None => "guest".to_string(),
        }
    }

    pub async fn nickname(&self, key: &str) -> Option<String> {
        self.state.read().await.nicknames.get(key).cloned()
    }

    /// Upserts the nickname for a target key; an empty value deletes the
    /// mapping instead of storing an empty string.
    pub async fn set_nickname(&self, key: &str, nickname: &str) -> Result<(), ProfileError> {
        let map = {
            let mut state = self.state.write().await;
            if nickname.is_empty() {
                state.nicknames.remove(key);
            } else {
                state
                    .nicknames
                    .insert(key.to_string(), nickname.to_string());
            }
            state.nicknames.clone()
        };
        self.merge_map(fields::NICKNAMES, &map).await
    }

    pub async fn chat_background(&self, chat_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .chat_backgrounds
            .get(chat_id)
            .cloned()
    }

    pub async fn set_chat_background(
        &self,
        chat_id: &str,
        background: &str,
    ) -> Result<(), ProfileError> {
        let map = {
            let mut state = self.state.write().await;
            state
                .chat_backgrounds
                .insert(chat_id.to_string(), background.to_string());
            state.chat_backgrounds.clone()
        };
        self.merge_map(fields::CHAT_BACKGROUNDS, &map).await
    }

    pub async fn chat_background_image(&self, chat_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .chat_background_images
            .get(chat_id)
            .cloned()
    }

    /// Sets or clears the local background image for a chat. Setting an
    /// image does not clear the color token in the store; precedence is
    /// applied at display time.
    pub async fn set_chat_background_image(
        &self,
        chat_id: &str,
        image_path: Option<&str>,
    ) -> Result<(), ProfileError> {
        let map = {
            let mut state = self.state.write().await;
            match image_path {
                Some(path) => {
                    state
                        .chat_background_images
                        .insert(chat_id.to_string(), path.to_string());
                }
                None => {
                    state.chat_background_images.remove(chat_id);
                }
            }
            state.chat_background_images.clone()
        };
        self.merge_map(fields::CHAT_BACKGROUND_IMAGES, &map).await
    }

    /// The background to draw for a chat: image over color over default.
    pub async fn effective_background(&self, chat_id: &str) -> ChatBackground {
        let state = self.state.read().await;
        if let Some(path) = state.chat_background_images.get(chat_id) {
            return ChatBackground::Image(path.clone());
        }
        match state.chat_backgrounds.get(chat_id) {
            Some(token) if token != "default" && token != "image" => {
                ChatBackground::Color(token.clone())
            }
            _ => ChatBackground::Default,
        }
    }

    /// Resolves the display name for a handle, in priority order:
    /// non-empty nickname, non-empty cached name, remote lookup by handle
    /// (cached on success), then the handle's local part. Empty values at
    /// any tier fall through instead of short-circuiting.
    pub async fn resolve_display_name(&self, handle: &str) -> Result<String, ProfileError> {
        let handle = normalize_handle(handle);
        {
            let state = self.state.read().await;
            if let Some(nickname) = state.nicknames.get(&handle) {
                if !nickname.is_empty() {
                    return Ok(nickname.clone());
                }
            }
            if let Some(cached) = state.display_names.get(&handle) {
                if !cached.is_empty() {
                    return Ok(cached.clone());
                }
            }
        }

        let query = Query::collection(USERS_COLLECTION)
            .field_equals(fields::EMAIL, FieldValue::String(handle.clone()))
            .limit(1);
        let docs = self
            .store
            .get_documents(&query)
            .await
            .map_err(ProfileError::QueryFailed)?;
        if let Some(name) = docs.first().and_then(|doc| doc.str_field(fields::DISPLAY_NAME)) {
            if !name.is_empty() {
                self.state
                    .write()
                    .await
                    .display_names
                    .insert(handle, name.to_string());
                return Ok(name.to_string());
            }
        }

        Ok(handle_local_part(&handle).to_string())
    }

    /// Synchronous variant of the resolution chain that skips the remote
    /// tier: nickname, then cache, then local part.
    pub async fn display_name_cached(&self, handle: &str) -> String {
        let handle = normalize_handle(handle);
        let state = self.state.read().await;
        if let Some(nickname) = state.nicknames.get(&handle) {
            if !nickname.is_empty() {
                return nickname.clone();
            }
        }
        if let Some(cached) = state.display_names.get(&handle) {
            if !cached.is_empty() {
                return cached.clone();
            }
        }
        handle_local_part(&handle).to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("No signed-in user")]
    Unauthenticated,
    #[error("Profile lookup failed: {0}")]
    QueryFailed(StoreError),
    #[error("Profile write failed: {0}")]
    WriteFailed(StoreError),
}
