//! HTTP helpers for the JSON API with a fixed timeout, default headers, and
//! consistent error handling. Session and feature code use these helpers so
//! request setup and bearer handling live in one place. The helpers never log
//! request bodies or tokens.

pub mod envelope;
pub mod interceptor;

pub use envelope::{EnvelopeError, ListEnvelope, Page};
pub use interceptor::{AuthFailureHandler, TokenInterceptor};

use crate::{config::ClientConfig, errors::ApiError};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method, RequestBuilder, Response, StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Maximum number of error body characters surfaced to the UI.
const MAX_ERROR_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    root: String,
    interceptor: Arc<TokenInterceptor>,
}

impl ApiClient {
    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &ClientConfig, interceptor: Arc<TokenInterceptor>) -> Result<Self, ApiError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .default_headers(headers)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|err| ApiError::Config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            root: config.endpoint_root(),
            interceptor,
        })
    }

    #[must_use]
    pub fn interceptor(&self) -> &TokenInterceptor {
        &self.interceptor
    }

    /// Absolute URL for an API path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        build_url_with_base(&self.root, path)
    }

    /// # Errors
    /// Returns an error on transport failure, non-success status, or undecodable body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        handle_json_response(response).await
    }

    /// # Errors
    /// Returns an error on transport failure, non-success status, or undecodable body.
    pub async fn get_json_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path).query(query)).await?;
        handle_json_response(response).await
    }

    /// # Errors
    /// Returns an error on encode failure, transport failure, non-success status, or undecodable body.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let builder = with_json_body(self.request(Method::POST, path), body)?;
        let response = self.send(builder).await?;
        handle_json_response(response).await
    }

    /// # Errors
    /// Returns an error on encode failure, transport failure, non-success status, or undecodable body.
    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let builder = with_json_body(self.request(Method::PUT, path), body)?;
        let response = self.send(builder).await?;
        handle_json_response(response).await
    }

    /// Posts an empty body and ignores the response body.
    /// # Errors
    /// Returns an error on transport failure or non-success status.
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let response = self.send(self.request(Method::POST, path)).await?;
        handle_empty_response(response).await
    }

    /// Posts an empty body authorized with `token` instead of the session's
    /// current one. The response is not inspected, so a `401` here never
    /// clears the session.
    /// # Errors
    /// Returns an error on transport failure or non-success status.
    pub async fn post_empty_as(&self, path: &str, token: &SecretString) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, path)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(map_request_error)?;
        debug!("{} {}", response.status(), response.url().path());
        handle_empty_response(response).await
    }

    /// # Errors
    /// Returns an error on transport failure or non-success status.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.send(self.request(Method::DELETE, path)).await?;
        handle_empty_response(response).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    /// Runs the interceptor pair around a single request.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let (builder, used) = self.interceptor.authorize(builder);
        let response = builder.send().await.map_err(map_request_error)?;

        debug!("{} {}", response.status(), response.url().path());

        self.interceptor.inspect(response.status(), used.as_ref());

        Ok(response)
    }
}

fn with_json_body<B: Serialize + ?Sized>(
    builder: RequestBuilder,
    body: &B,
) -> Result<RequestBuilder, ApiError> {
    let payload = serde_json::to_vec(body)
        .map_err(|err| ApiError::Serialization(format!("Failed to encode request: {err}")))?;
    Ok(builder.header(CONTENT_TYPE, "application/json").body(payload))
}

/// Builds a URL from an explicit base URL and the provided path.
pub(crate) fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

/// Maps transport errors into `ApiError` variants with timeout detection.
pub(crate) fn map_request_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout("Request timed out. Please try again.".to_string())
    } else if err.is_builder() {
        ApiError::Serialization(format!("Failed to build request: {err}"))
    } else if err.is_decode() {
        ApiError::Parse(format!("Failed to decode response: {err}"))
    } else {
        ApiError::Network(format!("Unable to reach the server: {err}"))
    }
}

/// Parses JSON responses and surfaces HTTP errors with extracted messages.
async fn handle_json_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_from_response(response).await);
    }

    let bytes = response.bytes().await.map_err(map_request_error)?;
    let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes[..] };

    serde_json::from_slice(body)
        .map_err(|err| ApiError::Parse(format!("Failed to decode response: {err}")))
}

/// Handles responses whose body is irrelevant on success.
async fn handle_empty_response(response: Response) -> Result<(), ApiError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body);

    if status == StatusCode::UNAUTHORIZED {
        ApiError::Unauthorized(message)
    } else {
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pulls the server message out of an error body: `detail`, `message`,
/// `error`, then `errors[0]`, falling back to the sanitized raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| message_from_value(&value))
        .map_or_else(|| sanitize_body(body), |message| truncate(&message))
}

/// Like [`extract_error_message`] but `None` when the body carries no message:
/// empty, or JSON without any of the message fields.
pub(crate) fn server_message(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => message_from_value(&value).map(|message| truncate(&message)),
        Err(_) => Some(body.trim())
            .filter(|text| !text.is_empty())
            .map(truncate),
    }
}

fn message_from_value(value: &Value) -> Option<String> {
    match value.get("detail") {
        Some(Value::String(detail)) if !detail.trim().is_empty() => {
            return Some(detail.trim().to_string());
        }
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str).or_else(|| item.as_str()))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .or_else(|| {
            value
                .get("errors")
                .and_then(|errors| errors.get(0))
                .and_then(Value::as_str)
        })
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

/// Sanitizes HTTP error bodies for user-facing messages by trimming and truncating.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        truncate(trimmed)
    }
}

fn truncate(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}
