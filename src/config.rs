//! Client configuration for the API host, versioned path prefix, and request
//! timeouts. Configuration values are public; secrets never live here.

use crate::{errors::ApiError, APP_USER_AGENT};
use std::time::Duration;
use url::Url;

const DEFAULT_API_PREFIX: &str = "/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    api_base_url: String,
    api_prefix: String,
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: String,
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: normalize_base(&api_base_url.into()),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: APP_USER_AGENT.to_string(),
        }
    }

    /// Versioned path prefix, e.g. `/api/v1`. An empty prefix targets the host root.
    #[must_use]
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = normalize_prefix(&prefix.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(self, seconds: u64) -> Self {
        self.with_timeout(Duration::from_secs(seconds))
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    #[must_use]
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Root that endpoint paths are appended to: base URL plus prefix.
    #[must_use]
    pub fn endpoint_root(&self) -> String {
        format!("{}{}", self.api_base_url, self.api_prefix)
    }

    /// # Errors
    /// Returns `ApiError::Config` if the base URL is empty, unparsable, not
    /// http(s), or the timeout is zero.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.api_base_url.is_empty() {
            return Err(ApiError::Config("API base URL is not configured.".to_string()));
        }

        let url = Url::parse(&self.api_base_url)
            .map_err(|err| ApiError::Config(format!("Invalid API base URL: {err}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "Unsupported API URL scheme: {}",
                url.scheme()
            )));
        }

        if self.timeout.is_zero() {
            return Err(ApiError::Config("Request timeout must be positive.".to_string()));
        }

        Ok(())
    }
}

fn normalize_base(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn normalize_prefix(value: &str) -> String {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
