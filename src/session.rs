//! Per-user session context.
//!
//! One `Session` per signed-in user owns one profile store and wires the
//! directory, message stream, and recent-activity components to the same
//! document store and identity provider. This replaces the process-wide
//! shared profile manager the original client used.

use std::sync::Arc;

use docstore::DocumentStore;

use crate::directory::ChatDirectory;
use crate::identity::{IdentityProvider, SessionUser};
use crate::profile::{ProfileError, ProfileStore};
use crate::recent::RecentActivity;
use crate::stream::MessageStream;

pub struct Session {
    user: SessionUser,
    directory: ChatDirectory,
    messages: MessageStream,
    profile: ProfileStore,
    recent: RecentActivity,
}

impl Session {
    /// Opens a session for the currently signed-in user and loads their
    /// profile. Fails when nobody is signed in.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ProfileError> {
        let user = identity
            .current_user()
            .ok_or(ProfileError::Unauthenticated)?;
        let profile = ProfileStore::new(Arc::clone(&store), Arc::clone(&identity));
        profile.load().await?;
        Ok(Session {
            user,
            directory: ChatDirectory::new(Arc::clone(&store), Arc::clone(&identity)),
            messages: MessageStream::new(Arc::clone(&store), Arc::clone(&identity)),
            recent: RecentActivity::new(store, Arc::clone(&identity)),
            profile,
        })
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    pub fn directory(&self) -> &ChatDirectory {
        &self.directory
    }

    pub fn messages(&self) -> &MessageStream {
        &self.messages
    }

    pub fn profile(&self) -> &ProfileStore {
        &self.profile
    }

    pub fn recent(&self) -> &RecentActivity {
        &self.recent
    }
}
