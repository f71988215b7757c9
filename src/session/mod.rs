//! Session store: the single source of truth for who is logged in and which
//! bearer token authorizes requests.
//!
//! The store is an explicitly constructed [`SessionContext`]. Clones share the
//! same state. [`SessionContext::dispose`] tears it down: it closes the event
//! channel and makes every later action fail with `Disposed`.
//!
//! Flow Overview:
//! - `login`/`register` post credentials. On success the token is persisted,
//!   installed as the default authorization, and the profile is stored.
//! - `initialize_auth` restores a persisted token and validates it against
//!   `GET /users/me`. Any failure is treated as an invalid token and logs out.
//! - `logout` always clears local state, then notifies the server best-effort
//!   with the token it held.
//! - Any `401` on a bearer-authorized request clears the session through the
//!   interceptor, whichever action sent it.
//!
//! Overlapping actions in the same slot do not race. Only the newest one may
//! write state; older ones resolve to `Superseded`.

pub(crate) mod guard;
pub mod state;
pub mod types;

pub use state::{SessionEvent, SessionSnapshot};
pub use types::{Credentials, Registration, TelegramIdentity, UserId, UserProfile};

use crate::{
    api::{ApiClient, AuthFailureHandler, TokenInterceptor},
    config::ClientConfig,
    errors::{ActionFailure, ActionResult, ApiError, FailureKind},
    storage::{KeyValueStore, TOKEN_KEY},
};
use guard::{InFlight, Slot, Ticket};
use secrecy::SecretString;
use serde_json::{json, Value};
use state::SessionState;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use types::{profile_payload, AuthResponse, ProfileEnvelope};

pub(crate) const LOGIN_PATH: &str = "/users/login";
pub(crate) const REGISTER_PATH: &str = "/users/register";
pub(crate) const LOGOUT_PATH: &str = "/users/logout";
pub(crate) const ME_PATH: &str = "/users/me";

const EVENT_CAPACITY: usize = 32;

/// State shared between the store and the response interceptor.
struct SessionShared {
    state: RwLock<SessionState>,
    events: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    in_flight: InFlight,
    disposed: AtomicBool,
}

impl SessionShared {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(SessionState::default()),
            events: Mutex::new(Some(sender)),
            in_flight: InFlight::default(),
            disposed: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let events = self
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = events.as_ref() {
            // No subscribers is fine.
            let _ = sender.send(event);
        }
    }
}

impl AuthFailureHandler for SessionShared {
    fn on_unauthorized(&self) {
        self.write().clear();
        self.emit(SessionEvent::LoginRequired);
    }
}

struct Inner {
    api: ApiClient,
    store: Arc<dyn KeyValueStore>,
    shared: Arc<SessionShared>,
}

#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("snapshot", &self.snapshot())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl SessionContext {
    /// Builds an empty session around the given store. Nothing is restored
    /// until [`SessionContext::initialize_auth`] runs.
    /// # Errors
    /// Returns `ApiError::Config` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, ApiError> {
        let shared = Arc::new(SessionShared::new());
        let handler: Arc<dyn AuthFailureHandler> = shared.clone();
        let interceptor = Arc::new(TokenInterceptor::new(store.clone()).with_failure_handler(handler));
        let api = ApiClient::new(config, interceptor)?;

        Ok(Self {
            inner: Arc::new(Inner { api, store, shared }),
        })
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub(crate) fn store(&self) -> &dyn KeyValueStore {
        self.inner.store.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let shared = &self.inner.shared;
        shared.read().snapshot(shared.in_flight.is_busy())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.shared.read().is_authenticated
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.shared.read().user.clone()
    }

    /// Current bearer token, for callers that talk to other services.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        self.inner.shared.read().token.clone()
    }

    /// Subscribes to session events. Returns `None` once disposed.
    #[must_use]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.inner
            .shared
            .events
            .lock()
            .ok()
            .and_then(|events| events.as_ref().map(broadcast::Sender::subscribe))
    }

    /// Tears the context down. In-flight actions resolve to `Superseded`,
    /// later actions fail with `Disposed`, and subscribers see the channel
    /// close. Persisted state is left untouched.
    pub fn dispose(&self) {
        let shared = &self.inner.shared;
        if shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.in_flight.supersede_all();
        if let Ok(mut events) = shared.events.lock() {
            events.take();
        }
        debug!("session disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.shared.disposed.load(Ordering::SeqCst)
    }

    /// Signs in with username and password.
    /// # Errors
    /// Returns an `ActionFailure` carrying the server message on rejection.
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> ActionResult<UserProfile> {
        credentials.validate()?;
        let ticket = self.begin(Slot::Identity)?;

        let result = self
            .inner
            .api
            .post_json::<_, AuthResponse>(LOGIN_PATH, &credentials.request())
            .await;

        self.complete_authentication(ticket, result)
    }

    /// Creates an account and signs in with it.
    /// # Errors
    /// Returns a validation failure before any request, or an `ActionFailure`
    /// carrying the server message on rejection.
    #[instrument(skip(self, registration), fields(username = %registration.username))]
    pub async fn register(&self, registration: &Registration) -> ActionResult<UserProfile> {
        registration.validate()?;
        let ticket = self.begin(Slot::Identity)?;

        let result = self
            .inner
            .api
            .post_json::<_, AuthResponse>(REGISTER_PATH, &registration.request())
            .await;

        self.complete_authentication(ticket, result)
    }

    /// Unconditional local clear plus a best-effort server logout for the
    /// token that was current. The clear happens before the request so an
    /// action started while the server call is pending keeps its result.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.inner.shared.in_flight.supersede_all();

        let token = self.inner.api.interceptor().current_token();
        self.clear_local();
        self.inner.shared.emit(SessionEvent::LoggedOut);
        info!("signed out");

        if let Some(token) = token {
            if let Err(err) = self.inner.api.post_empty_as(LOGOUT_PATH, &token).await {
                debug!("server logout failed, already cleared locally: {err}");
            }
        }
    }

    /// Restores a persisted token and validates it. Returns `Ok(None)` when no
    /// token is persisted. A token the server no longer accepts ends in the
    /// same state as [`SessionContext::logout`].
    /// # Errors
    /// Returns the validation failure after logging out.
    #[instrument(skip(self))]
    pub async fn initialize_auth(&self) -> ActionResult<Option<UserProfile>> {
        let ticket = self.begin(Slot::Identity)?;

        let persisted = match self.inner.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                self.finish(ticket);
                return Err(err.into());
            }
        };

        let Some(token) = persisted else {
            self.finish(ticket);
            debug!("no persisted token");
            return Ok(None);
        };

        let token = SecretString::from(token);
        self.inner
            .api
            .interceptor()
            .set_default_authorization(token.clone());
        self.inner.shared.write().restore_token(token.clone());

        let result = self.inner.api.get_json::<ProfileEnvelope>(ME_PATH).await;

        if !self.finish(ticket) {
            return Err(ActionFailure::superseded());
        }

        match result {
            Ok(envelope) => {
                let user = envelope.into_profile();
                self.inner.shared.write().authenticate(user.clone(), token);
                self.inner.shared.emit(SessionEvent::Authenticated {
                    user_id: user.id.clone(),
                });
                info!("restored session for user {}", user.id);
                Ok(Some(user))
            }
            Err(err) => {
                warn!("persisted token rejected: {err}");
                let failure = ActionFailure::from(err);
                self.logout().await;
                Err(failure)
            }
        }
    }

    /// Sends a partial profile update and merges the server answer.
    /// Does nothing without an authenticated session.
    /// # Errors
    /// Returns `NotAuthenticated` without a session, or the server failure.
    #[instrument(skip(self, changes))]
    pub async fn update_user(&self, changes: &Value) -> ActionResult<UserProfile> {
        self.update_profile(changes).await
    }

    /// Sends a partial preferences update and merges the server answer.
    /// Does nothing without an authenticated session.
    /// # Errors
    /// Returns `NotAuthenticated` without a session, or the server failure.
    #[instrument(skip(self, preferences))]
    pub async fn update_preferences(&self, preferences: &Value) -> ActionResult<UserProfile> {
        self.update_profile(&json!({ "preferences": preferences }))
            .await
    }

    /// Probes the profile endpoint with the current token. This is a validity
    /// check, not a rotation: any failure logs out. On success the profile is
    /// replaced wholesale.
    /// # Errors
    /// Returns `NotAuthenticated` without a token, or the probe failure after logging out.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self) -> ActionResult<UserProfile> {
        let Some(token) = self.inner.api.interceptor().current_token() else {
            return Err(ActionFailure::not_authenticated());
        };
        let ticket = self.begin(Slot::Identity)?;

        let result = self.inner.api.get_json::<ProfileEnvelope>(ME_PATH).await;

        if !self.finish(ticket) {
            return Err(ActionFailure::superseded());
        }

        match result {
            Ok(envelope) => {
                let user = envelope.into_profile();
                let mut state = self.inner.shared.write();
                if state.is_authenticated {
                    state.user = Some(user.clone());
                } else {
                    state.authenticate(user.clone(), token);
                }
                drop(state);
                self.inner.shared.emit(SessionEvent::ProfileUpdated);
                Ok(user)
            }
            Err(err) => {
                warn!("token probe failed: {err}");
                let failure = ActionFailure::from(err);
                self.logout().await;
                Err(failure)
            }
        }
    }

    async fn update_profile(&self, body: &Value) -> ActionResult<UserProfile> {
        if !self.is_authenticated() {
            debug!("profile update skipped: not authenticated");
            return Err(ActionFailure::not_authenticated());
        }
        let epoch = self.epoch();
        let ticket = self.begin(Slot::Profile)?;

        let result = self.inner.api.put_json::<_, Value>(ME_PATH, body).await;

        if !self.finish(ticket) {
            return Err(ActionFailure::superseded());
        }

        let payload = match result {
            Ok(value) => profile_payload(value),
            Err(err) => return Err(self.fail(err)),
        };

        let updated = self.apply_profile(epoch, |profile| {
            profile.merged_with(&payload).map_err(|err| {
                ActionFailure::new(
                    FailureKind::Server,
                    format!("Unexpected profile response: {err}"),
                )
            })
        })?;
        self.inner.shared.emit(SessionEvent::ProfileUpdated);

        Ok(updated)
    }

    fn complete_authentication(
        &self,
        ticket: Ticket,
        result: Result<AuthResponse, ApiError>,
    ) -> ActionResult<UserProfile> {
        if !self.finish(ticket) {
            debug!("discarding superseded authentication response");
            return Err(ActionFailure::superseded());
        }

        match result {
            Ok(response) => self.establish(response),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Persists the token, installs the default authorization, and stores the profile.
    pub(crate) fn establish(&self, response: AuthResponse) -> ActionResult<UserProfile> {
        let AuthResponse { user, token } = response;
        let token = token.trim().to_string();
        if token.is_empty() {
            let failure = ActionFailure::new(FailureKind::Server, "Server did not return a token.");
            self.inner.shared.write().error = Some(failure.message.clone());
            return Err(failure);
        }

        self.inner.store.set(TOKEN_KEY, &token)?;

        let token = SecretString::from(token);
        self.inner
            .api
            .interceptor()
            .set_default_authorization(token.clone());
        self.inner.shared.write().authenticate(user.clone(), token);
        self.inner.shared.emit(SessionEvent::Authenticated {
            user_id: user.id.clone(),
        });

        info!("signed in as user {}", user.id);

        Ok(user)
    }

    /// Starts an action: refuses when disposed, otherwise takes a ticket and
    /// counts the action as loading until [`SessionContext::finish`].
    pub(crate) fn begin(&self, slot: Slot) -> ActionResult<Ticket> {
        if self.is_disposed() {
            return Err(ActionFailure::disposed());
        }
        Ok(self.inner.shared.in_flight.begin(slot))
    }

    /// Ends an action. Returns false when the ticket was superseded, in which
    /// case the caller must not touch shared state.
    pub(crate) fn finish(&self, ticket: Ticket) -> bool {
        self.inner.shared.in_flight.end(ticket)
    }

    /// Converts a transport error and records its message on the session.
    pub(crate) fn fail(&self, err: ApiError) -> ActionFailure {
        let failure = ActionFailure::from(err);
        self.inner.shared.write().error = Some(failure.message.clone());
        failure
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.shared.read().epoch
    }

    /// Rewrites the stored profile if the identity has not changed since `epoch`.
    pub(crate) fn apply_profile(
        &self,
        epoch: u64,
        change: impl FnOnce(&UserProfile) -> ActionResult<UserProfile>,
    ) -> ActionResult<UserProfile> {
        let mut state = self.inner.shared.write();
        if state.epoch != epoch || !state.is_authenticated {
            debug!("discarding profile change for a replaced session");
            return Err(ActionFailure::superseded());
        }
        let current = state
            .user
            .as_ref()
            .ok_or_else(ActionFailure::not_authenticated)?;
        let updated = change(current)?;
        state.user = Some(updated.clone());
        Ok(updated)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.inner.shared.emit(event);
    }

    fn clear_local(&self) {
        if let Err(err) = self.inner.store.remove(TOKEN_KEY) {
            warn!("failed to remove persisted token: {err}");
        }
        self.inner.api.interceptor().clear_default_authorization();
        self.inner.shared.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use anyhow::{anyhow, Result};
    use secrecy::ExposeSecret;
    use std::net::TcpListener;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn session(uri: &str) -> Result<(SessionContext, Arc<MemoryStore>)> {
        let store = Arc::new(MemoryStore::new());
        let session = SessionContext::new(&ClientConfig::new(uri), store.clone())?;
        Ok((session, store))
    }

    async fn mount_login(server: &MockServer, username: &str, token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .and(body_partial_json(json!({"username": username})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"id": 1, "username": username},
                "token": token
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn login_persists_token_and_authenticates() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        mount_login(&server, "demo", "tok-123").await;

        let (session, store) = session(&server.uri())?;
        let mut events = session.subscribe().ok_or_else(|| anyhow!("no events"))?;

        let user = session.login(&Credentials::new("demo", "right")).await?;
        assert_eq!(user.username.as_deref(), Some("demo"));

        let snapshot = session.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.loading);
        assert_eq!(store.get(TOKEN_KEY)?.as_deref(), Some("tok-123"));
        assert_eq!(
            session.token().map(|t| t.expose_secret().to_string()),
            Some("tok-123".to_string())
        );
        assert_eq!(
            events.recv().await?,
            SessionEvent::Authenticated {
                user_id: UserId::Numeric(1)
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_failure_surfaces_detail() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "invalid credentials"})),
            )
            .mount(&server)
            .await;

        let (session, store) = session(&server.uri())?;
        let failure = session
            .login(&Credentials::new("demo", "wrong"))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected failure"))?;

        assert_eq!(failure.message, "invalid credentials");
        assert_eq!(store.get(TOKEN_KEY)?, None);
        let snapshot = session.snapshot();
        assert!(!snapshot.is_authenticated);
        assert_eq!(snapshot.error.as_deref(), Some("invalid credentials"));
        Ok(())
    }

    #[tokio::test]
    async fn validation_happens_before_any_request() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let (session, _) = session(&server.uri())?;

        let failure = session
            .register(&Registration::new("demo", "bad-email", "pw"))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected failure"))?;
        assert_eq!(failure.kind, FailureKind::Validation);

        let requests = server.received_requests().await.unwrap_or_default();
        assert!(requests.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn register_signs_in() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/register"))
            .and(body_partial_json(json!({
                "username": "newbie",
                "email": "newbie@example.com",
                "first_name": "Ming"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "user": {"id": 9, "username": "newbie"},
                "access_token": "fresh"
            })))
            .mount(&server)
            .await;

        let (session, store) = session(&server.uri())?;
        let registration = Registration::new("newbie", "newbie@example.com", "pw")
            .with_name(Some("Ming".to_string()), None);
        session.register(&registration).await?;

        assert!(session.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY)?.as_deref(), Some("fresh"));
        Ok(())
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_unreachable() -> Result<()> {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0") else {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        };
        let addr = listener.local_addr()?;
        drop(listener);

        let (session, store) = session(&format!("http://{addr}"))?;
        store.set(TOKEN_KEY, "still-here")?;
        session
            .api()
            .interceptor()
            .set_default_authorization(SecretString::from("still-here".to_string()));

        session.logout().await;

        assert_eq!(store.get(TOKEN_KEY)?, None);
        assert!(!session.api().interceptor().has_default_authorization());
        assert_eq!(session.snapshot(), SessionSnapshot::default());
        Ok(())
    }

    #[tokio::test]
    async fn initialize_with_rejected_token_matches_logout() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "token revoked"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let (session, store) = session(&server.uri())?;
        store.set(TOKEN_KEY, "revoked")?;

        let failure = session
            .initialize_auth()
            .await
            .err()
            .ok_or_else(|| anyhow!("expected failure"))?;
        assert_eq!(failure.kind, FailureKind::Unauthorized);

        let (reference, _) = self::session(&server.uri())?;
        reference.logout().await;

        assert_eq!(session.snapshot(), reference.snapshot());
        assert_eq!(store.get(TOKEN_KEY)?, None);
        assert!(!session.api().interceptor().has_default_authorization());
        Ok(())
    }

    #[tokio::test]
    async fn initialize_restores_valid_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .and(header("Authorization", "Bearer persisted"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"user": {"id": 3, "role": "admin"}})),
            )
            .mount(&server)
            .await;

        let (session, store) = session(&server.uri())?;
        assert_eq!(session.initialize_auth().await?, None);

        store.set(TOKEN_KEY, "persisted")?;
        let user = session
            .initialize_auth()
            .await?
            .ok_or_else(|| anyhow!("expected a user"))?;
        assert_eq!(user.role.as_deref(), Some("admin"));
        assert!(session.is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn any_unauthorized_response_clears_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        mount_login(&server, "demo", "short-lived").await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
            .mount(&server)
            .await;

        let (session, store) = session(&server.uri())?;
        session.login(&Credentials::new("demo", "pw")).await?;
        let mut events = session.subscribe().ok_or_else(|| anyhow!("no events"))?;

        let failure = session
            .update_user(&json!({"first_name": "X"}))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected failure"))?;

        assert_eq!(failure.kind, FailureKind::Unauthorized);
        assert!(!session.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY)?, None);
        assert_eq!(events.recv().await?, SessionEvent::LoginRequired);
        Ok(())
    }

    #[tokio::test]
    async fn loading_covers_every_outstanding_action() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        mount_login(&server, "demo", "tok-load").await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/users/me"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"first_name": "Slow"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let (session, _) = session(&server.uri())?;
        session.login(&Credentials::new("demo", "pw")).await?;

        let changes = json!({"first_name": "Slow"});
        let update = session.update_user(&changes);
        let relogin = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let result = session.login(&Credentials::new("demo", "pw")).await;
            (result, session.snapshot().loading)
        };
        let (_, (relogin, loading_after_login)) = tokio::join!(update, relogin);

        relogin?;
        assert!(loading_after_login);
        assert!(!session.snapshot().loading);
        Ok(())
    }

    #[tokio::test]
    async fn update_user_merges_response() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        mount_login(&server, "demo", "tok").await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/users/me"))
            .and(body_partial_json(json!({"preferences": {"currency": "USD"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"id": 1, "preferences": {"currency": "USD"}}
            })))
            .mount(&server)
            .await;

        let (session, _) = session(&server.uri())?;

        let failure = session
            .update_preferences(&json!({"currency": "USD"}))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected failure"))?;
        assert_eq!(failure.kind, FailureKind::NotAuthenticated);

        session.login(&Credentials::new("demo", "pw")).await?;
        let user = session.update_preferences(&json!({"currency": "USD"})).await?;

        assert_eq!(user.username.as_deref(), Some("demo"));
        assert_eq!(
            user.preferences.and_then(|p| p.get("currency").cloned()),
            Some(json!("USD"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_logs_out() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        mount_login(&server, "demo", "tok").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let (session, store) = session(&server.uri())?;
        assert_eq!(
            session.refresh_token().await.err().map(|f| f.kind),
            Some(FailureKind::NotAuthenticated)
        );

        session.login(&Credentials::new("demo", "pw")).await?;
        let failure = session
            .refresh_token()
            .await
            .err()
            .ok_or_else(|| anyhow!("expected failure"))?;
        assert_eq!(failure.message, "boom");
        assert!(!session.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn overlapping_logins_last_started_wins() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .and(body_partial_json(json!({"username": "slow"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"user": {"id": 1}, "token": "slow-token"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        mount_login(&server, "fast", "fast-token").await;

        let (session, store) = session(&server.uri())?;
        let slow_credentials = Credentials::new("slow", "pw");
        let fast_credentials = Credentials::new("fast", "pw");

        let slow = session.login(&slow_credentials);
        let fast = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.login(&fast_credentials).await
        };
        let (slow, fast) = tokio::join!(slow, fast);

        assert_eq!(slow.err().map(|f| f.kind), Some(FailureKind::Superseded));
        assert!(fast.is_ok());
        assert_eq!(store.get(TOKEN_KEY)?.as_deref(), Some("fast-token"));
        Ok(())
    }

    #[tokio::test]
    async fn dispose_rejects_actions_and_closes_events() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let (session, store) = session(&server.uri())?;
        store.set(TOKEN_KEY, "kept")?;
        let mut events = session.subscribe().ok_or_else(|| anyhow!("no events"))?;

        session.dispose();

        assert!(session.is_disposed());
        assert!(session.subscribe().is_none());
        assert!(events.recv().await.is_err());
        assert_eq!(
            session.initialize_auth().await.err().map(|f| f.kind),
            Some(FailureKind::Disposed)
        );
        assert_eq!(store.get(TOKEN_KEY)?.as_deref(), Some("kept"));
        Ok(())
    }
}
