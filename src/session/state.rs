//! In-memory session state and the events published when it changes. Only the
//! session store mutates this; everyone else reads snapshots.

use crate::session::types::{UserId, UserProfile};
use secrecy::SecretString;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { user_id: UserId },
    ProfileUpdated,
    LoggedOut,
    /// A bearer-authorized request was rejected; the UI should show the login view.
    LoginRequired,
    TelegramLinked { telegram_id: i64 },
    TelegramUnlinked,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) user: Option<UserProfile>,
    pub(crate) token: Option<SecretString>,
    pub(crate) is_authenticated: bool,
    pub(crate) error: Option<String>,
    /// Bumped whenever the identity changes, so late profile writes can be dropped.
    pub(crate) epoch: u64,
}

impl SessionState {
    /// Token present but not yet validated against the profile endpoint.
    pub(crate) fn restore_token(&mut self, token: SecretString) {
        self.token = Some(token);
        self.is_authenticated = false;
    }

    pub(crate) fn authenticate(&mut self, user: UserProfile, token: SecretString) {
        self.user = Some(user);
        self.token = Some(token);
        self.is_authenticated = true;
        self.error = None;
        self.epoch += 1;
    }

    pub(crate) fn clear(&mut self) {
        self.user = None;
        self.token = None;
        self.is_authenticated = false;
        self.error = None;
        self.epoch += 1;
    }

    /// `loading` comes from the in-flight guard, which outlives any one state write.
    pub(crate) fn snapshot(&self, loading: bool) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated,
            has_token: self.token.is_some(),
            loading,
            error: self.error.clone(),
        }
    }
}

/// Read-only view of the session. The token itself is never part of it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub has_token: bool,
    pub loading: bool,
    pub error: Option<String>,
}
