//! Telegram linking flow.
//!
//! A deep link is requested for either signing in or linking the current
//! account. The server answers with a URL and a correlation token; the URL is
//! opened for the user. The token and the action it belongs to are persisted so
//! verification can be retried, even after a restart.
//!
//! Retry rules for the correlation token:
//! - confirmed: token deleted once the result is applied, state `linked`
//! - pending or transient failure: token kept, state `awaiting_confirmation`
//! - any other rejection: token deleted, state `failed`
//!
//! There is no polling. Callers verify when the user says they confirmed, or
//! through [`TelegramFlow::check_status`].

pub mod opener;
pub mod types;

pub use opener::{LinkOpener, NoopOpener, SystemOpener};
pub use types::{DeepLink, LinkAction, LinkProgress, LinkState};

use crate::{
    errors::{ActionFailure, ActionResult, ApiError, FailureKind},
    session::{
        guard::{Slot, Ticket},
        types::AuthResponse,
        SessionContext, SessionEvent, UserProfile,
    },
    storage::{CORRELATION_ACTION_KEY, CORRELATION_TOKEN_KEY},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use types::{is_pending, DeepLinkRequest, LinkVerification, LoginVerification, VerifyRequest};

const DEEP_LINK_CREATE_PATH: &str = "/telegram/deep-link/create";
const LINK_REQUEST_PATH: &str = "/telegram/link/request";
const VERIFY_LOGIN_PATH: &str = "/telegram/verify";
const VERIFY_LINK_PATH: &str = "/telegram/link/verify";
const LINK_PATH: &str = "/telegram/link";

#[derive(Clone, Debug)]
pub struct TelegramFlow {
    session: SessionContext,
    opener: Arc<dyn LinkOpener>,
    progress: Arc<Mutex<LinkProgress>>,
}

impl TelegramFlow {
    #[must_use]
    pub fn new(session: SessionContext, opener: Arc<dyn LinkOpener>) -> Self {
        Self {
            session,
            opener,
            progress: Arc::new(Mutex::new(LinkProgress::default())),
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    #[must_use]
    pub fn progress(&self) -> LinkProgress {
        self.lock_progress().clone()
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.lock_progress().state
    }

    /// Correlation token waiting for verification, if any.
    #[must_use]
    pub fn pending_token(&self) -> Option<String> {
        match self.session.store().get(CORRELATION_TOKEN_KEY) {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                warn!("failed to read correlation token: {err}");
                None
            }
        }
    }

    /// Requests a sign-in deep link and opens it.
    /// # Errors
    /// Returns a validation failure for a non-positive id or the server failure.
    #[instrument(skip(self))]
    pub async fn login_with_telegram(&self, telegram_id: i64) -> ActionResult<DeepLink> {
        self.request_deep_link(LinkAction::Login, telegram_id).await
    }

    /// Requests a deep link that attaches Telegram to the signed-in account.
    /// # Errors
    /// Returns `NotAuthenticated` without a session, a validation failure for
    /// a non-positive id, or the server failure.
    #[instrument(skip(self))]
    pub async fn link_telegram_account(&self, telegram_id: i64) -> ActionResult<DeepLink> {
        if !self.session.is_authenticated() {
            return Err(ActionFailure::not_authenticated());
        }
        self.request_deep_link(LinkAction::LinkAccount, telegram_id)
            .await
    }

    /// Exchanges the correlation token for a session. Uses the persisted token
    /// when none is given.
    /// # Errors
    /// Returns `Pending` while the user has not confirmed yet, or the failure.
    #[instrument(skip(self, token))]
    pub async fn verify_telegram_login(&self, token: Option<&str>) -> ActionResult<UserProfile> {
        let token = self.resolve_token(token)?;
        let ticket = self.session.begin(Slot::Identity)?;

        let result = self
            .session
            .api()
            .post_json::<_, LoginVerification>(VERIFY_LOGIN_PATH, &VerifyRequest { token: &token })
            .await;

        if !self.session.finish(ticket) {
            return Err(ActionFailure::superseded());
        }

        let verification = match result {
            Ok(verification) => verification,
            Err(err) => return Err(self.verification_failed(err)),
        };

        if is_pending(verification.status.as_deref()) {
            return Err(self.still_pending());
        }

        match (verification.user, verification.token) {
            (Some(user), Some(token)) => {
                let user = self.session.establish(AuthResponse { user, token })?;
                self.forget_token();
                self.update_progress(|progress| {
                    progress.state = LinkState::Linked;
                    progress.message = None;
                });
                info!("signed in through Telegram");
                Ok(user)
            }
            _ => Err(self.rejected(
                verification
                    .message
                    .unwrap_or_else(|| "Telegram login was not confirmed.".to_string()),
            )),
        }
    }

    /// Exchanges the correlation token for a linked identity and merges it
    /// into the profile. Uses the persisted token when none is given.
    /// # Errors
    /// Returns `NotAuthenticated` without a session, `Pending` while the user
    /// has not confirmed yet, or the failure.
    #[instrument(skip(self, token))]
    pub async fn verify_telegram_link(&self, token: Option<&str>) -> ActionResult<UserProfile> {
        if !self.session.is_authenticated() {
            return Err(ActionFailure::not_authenticated());
        }
        let token = self.resolve_token(token)?;
        let epoch = self.session.epoch();
        let ticket = self.session.begin(Slot::Telegram)?;

        let result = self
            .session
            .api()
            .post_json::<_, LinkVerification>(VERIFY_LINK_PATH, &VerifyRequest { token: &token })
            .await;

        if !self.session.finish(ticket) {
            return Err(ActionFailure::superseded());
        }

        let verification = match result {
            Ok(verification) => verification,
            Err(err) => return Err(self.verification_failed(err)),
        };

        if is_pending(verification.status.as_deref()) {
            return Err(self.still_pending());
        }

        let identity = verification
            .telegram
            .or_else(|| verification.user.and_then(|user| user.telegram));
        let Some(identity) = identity else {
            return Err(self.rejected(
                verification
                    .message
                    .unwrap_or_else(|| "Telegram account was not linked.".to_string()),
            ));
        };

        let telegram_id = identity.telegram_id;
        let user = self
            .session
            .apply_profile(epoch, |profile| Ok(profile.clone().with_telegram(identity)))?;
        self.forget_token();
        self.session
            .emit(SessionEvent::TelegramLinked { telegram_id });
        self.update_progress(|progress| {
            progress.state = LinkState::Linked;
            progress.message = None;
        });
        info!("linked Telegram account {telegram_id}");

        Ok(user)
    }

    /// Detaches Telegram from the signed-in account.
    /// # Errors
    /// Returns `NotAuthenticated` without a session, or the server failure.
    #[instrument(skip(self))]
    pub async fn unlink_telegram_account(&self) -> ActionResult<UserProfile> {
        if !self.session.is_authenticated() {
            return Err(ActionFailure::not_authenticated());
        }
        let epoch = self.session.epoch();
        let ticket = self.session.begin(Slot::Telegram)?;

        let result = self.session.api().delete(LINK_PATH).await;

        if !self.session.finish(ticket) {
            return Err(ActionFailure::superseded());
        }
        if let Err(err) = result {
            return Err(self.session.fail(err));
        }

        let user = self
            .session
            .apply_profile(epoch, |profile| Ok(profile.clone().without_telegram()))?;
        self.session.emit(SessionEvent::TelegramUnlinked);
        self.update_progress(|progress| *progress = LinkProgress::default());
        info!("unlinked Telegram account");

        Ok(user)
    }

    /// Action the pending correlation token was requested for, as persisted
    /// next to it.
    #[must_use]
    pub fn pending_action(&self) -> Option<LinkAction> {
        match self.session.store().get(CORRELATION_ACTION_KEY) {
            Ok(action) => action.as_deref().and_then(LinkAction::parse),
            Err(err) => {
                warn!("failed to read correlation action: {err}");
                None
            }
        }
    }

    /// Verifies whatever request is pending, as login or link depending on
    /// how it was started, also by an earlier process.
    /// # Errors
    /// Returns a validation failure when nothing is pending, otherwise the
    /// result of the matching verification.
    pub async fn check_status(&self) -> ActionResult<UserProfile> {
        let remembered = self.lock_progress().action;
        let action = remembered
            .or_else(|| self.pending_action())
            .unwrap_or(if self.session.is_authenticated() {
                LinkAction::LinkAccount
            } else {
                LinkAction::Login
            });
        debug!("checking Telegram status as {}", action.as_str());

        match action {
            LinkAction::Login => self.verify_telegram_login(None).await,
            LinkAction::LinkAccount => self.verify_telegram_link(None).await,
        }
    }

    async fn request_deep_link(&self, action: LinkAction, telegram_id: i64) -> ActionResult<DeepLink> {
        if telegram_id <= 0 {
            return Err(ActionFailure::validation("Telegram id must be a positive number."));
        }
        let ticket = self.session.begin(Slot::Telegram)?;
        self.update_progress(|progress| {
            *progress = LinkProgress {
                state: LinkState::LinkRequested,
                action: Some(action),
                deep_link: None,
                message: None,
            };
        });

        let path = match action {
            LinkAction::Login => DEEP_LINK_CREATE_PATH,
            LinkAction::LinkAccount => LINK_REQUEST_PATH,
        };
        let request = DeepLinkRequest {
            telegram_id,
            action: action.as_str(),
        };
        let result = self
            .session
            .api()
            .post_json::<_, DeepLink>(path, &request)
            .await;

        self.deep_link_received(ticket, action, result)
    }

    fn deep_link_received(
        &self,
        ticket: Ticket,
        action: LinkAction,
        result: Result<DeepLink, ApiError>,
    ) -> ActionResult<DeepLink> {
        if !self.session.finish(ticket) {
            return Err(ActionFailure::superseded());
        }

        let link = match result {
            Ok(link) => link,
            Err(err) => {
                let failure = self.session.fail(err);
                self.mark_failed(&failure.message);
                return Err(failure);
            }
        };

        if link.token.is_empty() {
            let failure = ActionFailure::new(FailureKind::Server, "Server did not return a link token.");
            self.mark_failed(&failure.message);
            return Err(failure);
        }

        let persisted = self
            .session
            .store()
            .set(CORRELATION_TOKEN_KEY, &link.token)
            .and_then(|()| self.session.store().set(CORRELATION_ACTION_KEY, action.as_str()));
        if let Err(err) = persisted {
            let failure = ActionFailure::from(err);
            self.mark_failed(&failure.message);
            return Err(failure);
        }

        if let Err(err) = self.opener.open(&link.deep_link) {
            warn!("could not open deep link, show it to the user instead: {err}");
        }

        self.update_progress(|progress| {
            progress.state = LinkState::AwaitingConfirmation;
            progress.deep_link = Some(link.deep_link.clone());
        });

        Ok(link)
    }

    fn resolve_token(&self, token: Option<&str>) -> ActionResult<String> {
        token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .or_else(|| self.pending_token())
            .ok_or_else(|| ActionFailure::validation("No pending Telegram request to verify."))
    }

    fn verification_failed(&self, err: ApiError) -> ActionFailure {
        let transient = err.is_transient();
        let failure = self.session.fail(err);
        if transient {
            debug!("verification failed transiently, keeping correlation token");
            self.update_progress(|progress| {
                progress.state = LinkState::AwaitingConfirmation;
                progress.message = Some(failure.message.clone());
            });
        } else {
            self.forget_token();
            self.mark_failed(&failure.message);
        }
        failure
    }

    fn still_pending(&self) -> ActionFailure {
        let failure = ActionFailure::pending();
        self.update_progress(|progress| {
            progress.state = LinkState::AwaitingConfirmation;
            progress.message = Some(failure.message.clone());
        });
        failure
    }

    fn rejected(&self, message: String) -> ActionFailure {
        self.forget_token();
        self.mark_failed(&message);
        ActionFailure::new(FailureKind::Server, message)
    }

    fn forget_token(&self) {
        for key in [CORRELATION_TOKEN_KEY, CORRELATION_ACTION_KEY] {
            if let Err(err) = self.session.store().remove(key) {
                warn!("failed to remove {key}: {err}");
            }
        }
    }

    fn mark_failed(&self, message: &str) {
        self.update_progress(|progress| {
            progress.state = LinkState::Failed;
            progress.message = Some(message.to_string());
        });
    }

    fn update_progress(&self, change: impl FnOnce(&mut LinkProgress)) {
        change(&mut *self.lock_progress());
    }

    fn lock_progress(&self) -> MutexGuard<'_, LinkProgress> {
        self.progress
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
