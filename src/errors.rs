//! Error types for the HTTP layer and the uniform failure shape returned by
//! store actions.
//!
//! `ApiError` describes what went wrong on the wire. `ActionFailure` is what the
//! session store and the linking flow hand back to their callers: a kind the UI
//! can branch on plus a message it can render as-is.

use crate::storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Generic message for requests that never received a response.
pub const NETWORK_ERROR_MESSAGE: &str = "Network error: unable to reach the server.";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("Response error: {0}")]
    Parse(String),
    #[error("Request error: {0}")]
    Serialization(String),
}

impl ApiError {
    /// HTTP status carried by the error, when a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Unauthorized(_) => Some(401),
            _ => None,
        }
    }

    /// True when no response was received at all.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// True when retrying the same request later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Message suitable for the UI: server messages verbatim, transport failures generic.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) | Self::Timeout(_) => NETWORK_ERROR_MESSAGE.to_string(),
            Self::Unauthorized(message) | Self::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Server,
    Unauthorized,
    Validation,
    Storage,
    NotAuthenticated,
    Superseded,
    Disposed,
    /// The server has not seen the confirmation yet; retrying later may succeed.
    Pending,
}

impl FailureKind {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Server => "SERVER_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Validation => "VALIDATION_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::Superseded => "SUPERSEDED",
            Self::Disposed => "DISPOSED",
            Self::Pending => "PENDING_CONFIRMATION",
        }
    }
}

/// Uniform failure returned by every store action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionFailure {
    pub kind: FailureKind,
    pub message: String,
}

pub type ActionResult<T> = Result<T, ActionFailure>;

impl ActionFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    #[must_use]
    pub fn not_authenticated() -> Self {
        Self::new(FailureKind::NotAuthenticated, "You need to sign in first.")
    }

    #[must_use]
    pub fn superseded() -> Self {
        Self::new(
            FailureKind::Superseded,
            "Request superseded by a newer request.",
        )
    }

    #[must_use]
    pub fn disposed() -> Self {
        Self::new(FailureKind::Disposed, "Session has been disposed.")
    }

    #[must_use]
    pub fn pending() -> Self {
        Self::new(
            FailureKind::Pending,
            "Confirmation not received yet. Confirm in Telegram and check again.",
        )
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for ActionFailure {}

impl From<ApiError> for ActionFailure {
    fn from(err: ApiError) -> Self {
        let kind = match &err {
            ApiError::Network(_) | ApiError::Timeout(_) => FailureKind::Network,
            ApiError::Unauthorized(_) => FailureKind::Unauthorized,
            ApiError::Config(_) => FailureKind::Validation,
            ApiError::Http { .. } | ApiError::Parse(_) | ApiError::Serialization(_) => {
                FailureKind::Server
            }
        };
        Self::new(kind, err.user_message())
    }
}

impl From<StorageError> for ActionFailure {
    fn from(err: StorageError) -> Self {
        Self::new(FailureKind::Storage, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_use_generic_message() {
        let failure = ActionFailure::from(ApiError::Timeout("aborted".to_string()));
        assert_eq!(failure.kind, FailureKind::Network);
        assert_eq!(failure.code(), "NETWORK_ERROR");
        assert_eq!(failure.message, NETWORK_ERROR_MESSAGE);
    }

    #[test]
    fn server_messages_are_verbatim() {
        let failure = ActionFailure::from(ApiError::Http {
            status: 409,
            message: "username already taken".to_string(),
        });
        assert_eq!(failure.kind, FailureKind::Server);
        assert_eq!(failure.message, "username already taken");

        let failure = ActionFailure::from(ApiError::Unauthorized("invalid credentials".to_string()));
        assert_eq!(failure.kind, FailureKind::Unauthorized);
        assert_eq!(failure.message, "invalid credentials");
    }

    #[test]
    fn transient_classification() {
        assert!(ApiError::Network("down".to_string()).is_transient());
        assert!(
            ApiError::Http {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            ApiError::Http {
                status: 429,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !ApiError::Http {
                status: 404,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!ApiError::Unauthorized(String::new()).is_transient());
    }

    #[test]
    fn display_includes_code() {
        let failure = ActionFailure::superseded();
        assert!(failure.to_string().starts_with("SUPERSEDED: "));
    }
}
