//! Who is signed in, as reported by the identity provider.
//!
//! Registration and password reset are handled by the real auth backend
//! and stay outside this crate; only the current-user surface and the
//! sign-in/sign-out intents are modeled.

use std::sync::{PoisonError, RwLock};

/// The signed-in user: an opaque identifier plus the email-like handle
/// used as the DM membership key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub handle: String,
}

impl SessionUser {
    /// Handles are compared case-insensitively everywhere, so the handle
    /// is normalized once here.
    pub fn new(user_id: impl Into<String>, handle: &str) -> Self {
        SessionUser {
            user_id: user_id.into(),
            handle: normalize_handle(handle),
        }
    }
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().to_lowercase()
}

/// Part of the handle before the '@', the display-name fallback of last
/// resort.
pub fn handle_local_part(handle: &str) -> &str {
    handle.split('@').next().unwrap_or(handle)
}

pub trait IdentityProvider: Send + Sync {
    /// Current user, or `None` when nobody is signed in.
    fn current_user(&self) -> Option<SessionUser>;
}

/// In-process identity state. Signing out mid-session makes every
/// subsequent mutating operation fail with the component's
/// `Unauthenticated` error.
#[derive(Default)]
pub struct LocalIdentity {
    current: RwLock<Option<SessionUser>>,
}

impl LocalIdentity {
    pub fn signed_in(user: SessionUser) -> Self {
        LocalIdentity {
            current: RwLock::new(Some(user)),
        }
    }

    pub fn signed_out() -> Self {
        LocalIdentity::default()
    }

    pub fn sign_in(&self, user: SessionUser) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for LocalIdentity {
    fn current_user(&self) -> Option<SessionUser> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
