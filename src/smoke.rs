//! Deployment smoke test for the API: health, CORS preflight on the login
//! endpoint, and the authorization contract the session store relies on.
//!
//! Requests go out on a bare client without the token interceptor so that no
//! persisted session leaks into the checks.

use crate::{
    api::{build_url_with_base, extract_error_message, map_request_error, server_message},
    config::ClientConfig,
    errors::ApiError,
    session::Credentials,
};
use reqwest::{
    header::{
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
        ACCESS_CONTROL_REQUEST_METHOD, AUTHORIZATION, ORIGIN,
    },
    Client, Method, StatusCode,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

pub const DEFAULT_ORIGIN: &str = "http://localhost:5173";

const HEALTH_PATH: &str = "/health";

#[derive(Clone, Debug)]
pub struct SmokeOptions {
    pub config: ClientConfig,
    pub origin: String,
    pub credentials: Option<Credentials>,
}

impl SmokeOptions {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            origin: DEFAULT_ORIGIN.to_string(),
            credentials: None,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SmokeReport {
    pub checks: Vec<CheckResult>,
}

impl SmokeReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|check| !check.passed).collect()
    }
}

struct Probe {
    http: Client,
    host: String,
    root: String,
}

impl Probe {
    fn url(&self, path: &str) -> String {
        build_url_with_base(&self.root, path)
    }
}

/// Runs every check and collects the results. Check failures end up in the
/// report; only an unusable configuration is an error.
/// # Errors
/// Returns `ApiError::Config` if the configuration is invalid.
#[instrument(skip(options), fields(host = %options.config.api_base_url()))]
pub async fn run(options: &SmokeOptions) -> Result<SmokeReport, ApiError> {
    options.config.validate()?;
    let http = Client::builder()
        .user_agent(options.config.user_agent())
        .timeout(options.config.timeout())
        .connect_timeout(options.config.connect_timeout())
        .build()
        .map_err(|err| ApiError::Config(format!("Failed to build HTTP client: {err}")))?;
    let probe = Probe {
        http,
        host: options.config.api_base_url().to_string(),
        root: options.config.endpoint_root(),
    };

    let mut report = SmokeReport::default();
    report.checks.push(check_health(&probe).await);
    report.checks.push(check_preflight(&probe, &options.origin).await);
    report.checks.push(check_anonymous_profile(&probe).await);
    report.checks.push(check_bogus_login(&probe).await);
    if let Some(credentials) = &options.credentials {
        report.checks.push(check_real_login(&probe, credentials).await);
    }

    for check in report.failures() {
        warn!("smoke check {} failed: {}", check.name, check.detail);
    }
    info!(
        "smoke test finished: {}/{} checks passed",
        report.checks.iter().filter(|check| check.passed).count(),
        report.checks.len()
    );

    Ok(report)
}

async fn check_health(probe: &Probe) -> CheckResult {
    const NAME: &str = "health";
    let url = build_url_with_base(&probe.host, HEALTH_PATH);
    match probe.http.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            CheckResult::pass(NAME, format!("{} {}", response.status().as_u16(), url))
        }
        Ok(response) => CheckResult::fail(NAME, format!("unexpected status {}", response.status())),
        Err(err) => CheckResult::fail(NAME, map_request_error(err).to_string()),
    }
}

async fn check_preflight(probe: &Probe, origin: &str) -> CheckResult {
    const NAME: &str = "cors_preflight";
    let request = probe
        .http
        .request(Method::OPTIONS, probe.url("/users/login"))
        .header(ORIGIN, origin)
        .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type");

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return CheckResult::fail(NAME, map_request_error(err).to_string()),
    };

    let allowed = response
        .headers()
        .get(ACCESS_CONTROL_ALLOW_ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    debug!("preflight status {} allow-origin {:?}", response.status(), allowed);

    match allowed {
        Some(value) if value == origin || value == "*" => {
            CheckResult::pass(NAME, format!("origin {origin} allowed"))
        }
        Some(value) => CheckResult::fail(NAME, format!("allow-origin is {value}, expected {origin}")),
        None => CheckResult::fail(NAME, "no Access-Control-Allow-Origin header"),
    }
}

async fn check_anonymous_profile(probe: &Probe) -> CheckResult {
    const NAME: &str = "profile_requires_auth";
    match probe.http.get(probe.url("/users/me")).send().await {
        Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
            CheckResult::pass(NAME, "401 without a token")
        }
        Ok(response) => CheckResult::fail(NAME, format!("expected 401, got {}", response.status())),
        Err(err) => CheckResult::fail(NAME, map_request_error(err).to_string()),
    }
}

async fn check_bogus_login(probe: &Probe) -> CheckResult {
    const NAME: &str = "bogus_login_rejected";
    let nonce = Ulid::new().to_string().to_lowercase();
    let body = json!({
        "username": format!("smoke-{nonce}"),
        "password": format!("invalid-{nonce}"),
    });

    let response = match probe.http.post(probe.url("/users/login")).json(&body).send().await {
        Ok(response) => response,
        Err(err) => return CheckResult::fail(NAME, map_request_error(err).to_string()),
    };

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
        return CheckResult::fail(NAME, format!("expected 400 or 401, got {status}"));
    }
    match server_message(&text) {
        Some(message) => CheckResult::pass(NAME, format!("{}: {message}", status.as_u16())),
        None => CheckResult::fail(NAME, format!("{} without an error message", status.as_u16())),
    }
}

async fn check_real_login(probe: &Probe, credentials: &Credentials) -> CheckResult {
    const NAME: &str = "real_login";
    let body = json!({
        "username": credentials.username.trim(),
        "password": credentials.password.expose_secret(),
    });

    let response = match probe.http.post(probe.url("/users/login")).json(&body).send().await {
        Ok(response) => response,
        Err(err) => return CheckResult::fail(NAME, map_request_error(err).to_string()),
    };
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return CheckResult::fail(NAME, format!("{}: {}", status.as_u16(), extract_error_message(&text)));
    }

    let token = serde_json::from_str::<Value>(&text).ok().and_then(|value| {
        ["token", "access_token"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
    });
    let Some(token) = token else {
        return CheckResult::fail(NAME, "login succeeded without a token");
    };

    match probe
        .http
        .get(probe.url("/users/me"))
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            CheckResult::pass(NAME, "token accepted by /users/me")
        }
        Ok(response) => CheckResult::fail(NAME, format!("/users/me returned {}", response.status())),
        Err(err) => CheckResult::fail(NAME, map_request_error(err).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    async fn healthy_api(server: &MockServer, origin: &str) {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(server)
            .await;
        Mock::given(method("OPTIONS"))
            .and(path("/api/v1/users/login"))
            .respond_with(
                ResponseTemplate::new(204).insert_header("Access-Control-Allow-Origin", origin),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .and(header("Authorization", "Bearer smoke-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "not authenticated"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn healthy_deployment_passes() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        healthy_api(&server, "https://shop.example.com").await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .and(wiremock::matchers::body_partial_json(json!({"username": "ops"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"user": {"id": 1}, "access_token": "smoke-token"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "invalid credentials"})),
            )
            .mount(&server)
            .await;

        let options = SmokeOptions::new(ClientConfig::new(server.uri()))
            .with_origin("https://shop.example.com")
            .with_credentials(Some(Credentials::new("ops", "pw")));
        let report = run(&options).await?;

        assert!(report.passed(), "failures: {:?}", report.failures());
        assert_eq!(report.checks.len(), 5);
        let bogus = report
            .checks
            .iter()
            .find(|check| check.name == "bogus_login_rejected");
        assert_eq!(
            bogus.map(|check| check.detail.as_str()),
            Some("401: invalid credentials")
        );
        Ok(())
    }

    #[tokio::test]
    async fn wrong_origin_and_open_profile_fail() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("OPTIONS"))
            .and(path("/api/v1/users/login"))
            .respond_with(
                ResponseTemplate::new(204)
                    .insert_header("Access-Control-Allow-Origin", "https://other.example.com"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad login"})))
            .mount(&server)
            .await;

        let report = run(&SmokeOptions::new(ClientConfig::new(server.uri()))).await?;

        assert!(!report.passed());
        let failed: Vec<&str> = report.failures().iter().map(|check| check.name).collect();
        assert_eq!(failed, vec!["cors_preflight", "profile_requires_auth"]);
        Ok(())
    }

    #[tokio::test]
    async fn bogus_login_without_message_fails() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        healthy_api(&server, DEFAULT_ORIGIN).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let report = run(&SmokeOptions::new(ClientConfig::new(server.uri()))).await?;

        let failed: Vec<&str> = report.failures().iter().map(|check| check.name).collect();
        assert_eq!(failed, vec!["bogus_login_rejected"]);
        assert_eq!(
            report.failures().first().map(|check| check.detail.as_str()),
            Some("401 without an error message")
        );
        Ok(())
    }

    #[tokio::test]
    async fn invalid_config_is_an_error() {
        let result = run(&SmokeOptions::new(ClientConfig::new("ftp://nowhere"))).await;
        assert!(matches!(result, Err(ApiError::Config(_))));
    }
}
