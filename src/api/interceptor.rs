//! Request/response interceptor pair for bearer authorization.
//!
//! Request side: the token persisted under [`TOKEN_KEY`] is attached as
//! `Authorization: Bearer <token>`. When nothing is persisted, the default
//! authorization set after a successful login is used instead.
//!
//! Response side: a `401` on a request that carried a bearer token removes the
//! persisted token, drops the default authorization, and notifies the installed
//! [`AuthFailureHandler`]. A `401` for a token that has since been replaced is
//! ignored so a late response cannot log out a newer session.

use crate::storage::{KeyValueStore, TOKEN_KEY};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

/// Receives global authorization failures. The session store implements this
/// to clear its in-memory state and ask the UI for a fresh login.
pub trait AuthFailureHandler: Send + Sync {
    fn on_unauthorized(&self);
}

pub struct TokenInterceptor {
    store: Arc<dyn KeyValueStore>,
    default_authorization: RwLock<Option<SecretString>>,
    handler: Option<Arc<dyn AuthFailureHandler>>,
}

impl fmt::Debug for TokenInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInterceptor")
            .field("store", &self.store)
            .field("default_authorization", &"***")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl TokenInterceptor {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            default_authorization: RwLock::new(None),
            handler: None,
        }
    }

    #[must_use]
    pub fn with_failure_handler(mut self, handler: Arc<dyn AuthFailureHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Token that the next request will carry, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<SecretString> {
        match self.store.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.trim().is_empty() => return Some(SecretString::from(token)),
            Ok(_) => {}
            Err(err) => warn!("failed to read persisted token: {err}"),
        }

        self.default_authorization
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    pub fn set_default_authorization(&self, token: SecretString) {
        if let Ok(mut guard) = self.default_authorization.write() {
            *guard = Some(token);
        }
    }

    pub fn clear_default_authorization(&self) {
        if let Ok(mut guard) = self.default_authorization.write() {
            *guard = None;
        }
    }

    #[must_use]
    pub fn has_default_authorization(&self) -> bool {
        self.default_authorization
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Attaches the bearer token and returns the token used, so the response
    /// side can tell whether a `401` still refers to the current session.
    pub fn authorize(&self, builder: RequestBuilder) -> (RequestBuilder, Option<SecretString>) {
        match self.current_token() {
            Some(token) => (builder.bearer_auth(token.expose_secret()), Some(token)),
            None => (builder, None),
        }
    }

    /// Inspects a response status. Returns true if the session was cleared.
    pub fn inspect(&self, status: StatusCode, used: Option<&SecretString>) -> bool {
        if status != StatusCode::UNAUTHORIZED {
            return false;
        }

        let Some(used) = used else {
            return false;
        };

        let still_current = self
            .current_token()
            .is_some_and(|current| current.expose_secret() == used.expose_secret());

        if !still_current {
            debug!("ignoring 401 for a token that is no longer current");
            return false;
        }

        warn!("authorization rejected, clearing session");

        if let Err(err) = self.store.remove(TOKEN_KEY) {
            warn!("failed to remove persisted token: {err}");
        }
        self.clear_default_authorization();

        if let Some(handler) = &self.handler {
            handler.on_unauthorized();
        }

        true
    }
}
