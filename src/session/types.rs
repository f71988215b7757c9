//! Request and response types for session endpoints. Credentials carry secrets
//! and must never be logged; their `Debug` output is redacted.

use crate::errors::ActionFailure;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned user id; the API has used both integers and strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelegramIdentity {
    pub telegram_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-provided user record. Unknown fields are kept in `extra` so a
/// round-trip through the client never drops data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(
        default,
        alias = "telegram_account",
        skip_serializing_if = "Option::is_none"
    )]
    pub telegram: Option<TelegramIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Deep-merges a server payload into this profile. Objects merge key by
    /// key; every other value replaces the current one.
    /// # Errors
    /// Returns an error if the merged record is no longer a valid profile.
    pub fn merged_with(&self, update: &Value) -> Result<Self, serde_json::Error> {
        let mut current = serde_json::to_value(self)?;
        merge_value(&mut current, update);
        serde_json::from_value(current)
    }

    #[must_use]
    pub fn with_telegram(mut self, identity: TelegramIdentity) -> Self {
        self.telegram = Some(identity);
        self
    }

    #[must_use]
    pub fn without_telegram(mut self) -> Self {
        self.telegram = None;
        self
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => self
                .username
                .clone()
                .or_else(|| self.email.clone())
                .unwrap_or_else(|| self.id.to_string()),
        }
    }
}

fn merge_value(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(key) {
                        merge_value(existing, value);
                    }
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        (target, update) => *target = update.clone(),
    }
}

/// `GET /users/me` answers either the bare profile or `{"user": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ProfileEnvelope {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

impl ProfileEnvelope {
    pub(crate) fn into_profile(self) -> UserProfile {
        match self {
            Self::Wrapped { user } | Self::Bare(user) => user,
        }
    }
}

/// Unwraps `{"user": {...}}` update responses; anything else is used as-is.
pub(crate) fn profile_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("user").is_some_and(Value::is_object) => {
            map.remove("user").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[derive(Deserialize)]
pub(crate) struct AuthResponse {
    pub(crate) user: UserProfile,
    #[serde(alias = "access_token")]
    pub(crate) token: String,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// # Errors
    /// Returns a validation failure when the username or password is blank.
    pub fn validate(&self) -> Result<(), ActionFailure> {
        if self.username.trim().is_empty() {
            return Err(ActionFailure::validation("Username is required."));
        }
        if self.password.expose_secret().is_empty() {
            return Err(ActionFailure::validation("Password is required."));
        }
        Ok(())
    }

    pub(crate) fn request(&self) -> LoginRequest<'_> {
        LoginRequest {
            username: self.username.trim(),
            password: self.password.expose_secret(),
        }
    }
}

#[derive(Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("phone", &self.phone)
            .finish()
    }
}

#[derive(Serialize)]
pub(crate) struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
}

impl Registration {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: SecretString::from(password.into()),
            first_name: None,
            last_name: None,
            phone: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, first_name: Option<String>, last_name: Option<String>) -> Self {
        self.first_name = first_name;
        self.last_name = last_name;
        self
    }

    #[must_use]
    pub fn with_phone(mut self, phone: Option<String>) -> Self {
        self.phone = phone;
        self
    }

    /// # Errors
    /// Returns a validation failure for a blank username or password or a malformed email.
    pub fn validate(&self) -> Result<(), ActionFailure> {
        if self.username.trim().is_empty() {
            return Err(ActionFailure::validation("Username is required."));
        }
        if !valid_email(self.email.trim()) {
            return Err(ActionFailure::validation("Email address is invalid."));
        }
        if self.password.expose_secret().is_empty() {
            return Err(ActionFailure::validation("Password is required."));
        }
        Ok(())
    }

    pub(crate) fn request(&self) -> RegisterRequest<'_> {
        RegisterRequest {
            username: self.username.trim(),
            email: self.email.trim(),
            password: self.password.expose_secret(),
            first_name: self.first_name.as_deref(),
            last_name: self.last_name.as_deref(),
            phone: self.phone.as_deref(),
        }
    }
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    fn profile() -> Result<UserProfile> {
        Ok(serde_json::from_value(json!({
            "id": 7,
            "username": "demo",
            "first_name": "Li",
            "role": "customer",
            "loyalty_tier": "gold",
            "preferences": {"currency": "CNY", "language": "zh"}
        }))?)
    }

    #[test]
    fn unknown_fields_survive_round_trip() -> Result<()> {
        let user = profile()?;
        assert_eq!(user.id, UserId::Numeric(7));
        assert_eq!(user.extra.get("loyalty_tier"), Some(&json!("gold")));

        let value = serde_json::to_value(&user)?;
        assert_eq!(value["loyalty_tier"], "gold");
        Ok(())
    }

    #[test]
    fn merge_is_deep_for_objects() -> Result<()> {
        let user = profile()?;
        let merged = user.merged_with(&json!({
            "first_name": "Wei",
            "preferences": {"currency": "USD"}
        }))?;

        assert_eq!(merged.first_name.as_deref(), Some("Wei"));
        assert_eq!(merged.username.as_deref(), Some("demo"));
        let preferences = merged.preferences.unwrap_or_default();
        assert_eq!(preferences.get("currency"), Some(&json!("USD")));
        assert_eq!(preferences.get("language"), Some(&json!("zh")));
        Ok(())
    }

    #[test]
    fn telegram_alias_is_accepted() -> Result<()> {
        let user: UserProfile = serde_json::from_value(json!({
            "id": "u-1",
            "telegram_account": {"telegram_id": 42, "username": "demo_tg"}
        }))?;
        assert_eq!(user.id.to_string(), "u-1");
        assert_eq!(user.telegram.map(|t| t.telegram_id), Some(42));
        Ok(())
    }

    #[test]
    fn profile_envelope_accepts_both_shapes() -> Result<()> {
        let wrapped: ProfileEnvelope = serde_json::from_value(json!({"user": {"id": 1}}))?;
        assert_eq!(wrapped.into_profile().id, UserId::Numeric(1));

        let bare: ProfileEnvelope = serde_json::from_value(json!({"id": 2, "email": "a@b.cn"}))?;
        assert_eq!(bare.into_profile().email.as_deref(), Some("a@b.cn"));
        Ok(())
    }

    #[test]
    fn profile_payload_unwraps_user() {
        assert_eq!(
            profile_payload(json!({"user": {"id": 1}, "message": "ok"})),
            json!({"id": 1})
        );
        assert_eq!(profile_payload(json!({"id": 1})), json!({"id": 1}));
    }

    #[test]
    fn display_name_falls_back() -> Result<()> {
        let mut user = profile()?;
        assert_eq!(user.display_name(), "Li");
        user.first_name = None;
        assert_eq!(user.display_name(), "demo");
        Ok(())
    }

    #[test]
    fn validation() {
        assert!(Credentials::new("demo", "secret").validate().is_ok());
        assert!(Credentials::new(" ", "secret").validate().is_err());
        assert!(Credentials::new("demo", "").validate().is_err());

        assert!(Registration::new("demo", "demo@example.com", "pw").validate().is_ok());
        assert!(Registration::new("demo", "not-an-email", "pw").validate().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let credentials = Credentials::new("demo", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn valid_email_cases() {
        assert!(valid_email("buyer@chinacarparts.dev"));
        assert!(!valid_email("buyer@"));
        assert!(!valid_email("buyer @x.cn"));
    }
}
