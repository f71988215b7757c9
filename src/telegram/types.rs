use crate::session::types::{TelegramIdentity, UserProfile};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAction {
    Login,
    LinkAccount,
}

impl LinkAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::LinkAccount => "link_account",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(Self::Login),
            "link_account" => Some(Self::LinkAccount),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Idle,
    LinkRequested,
    AwaitingConfirmation,
    Linked,
    Failed,
}

/// Progress of the current linking attempt, as shown to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkProgress {
    pub state: LinkState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<LinkAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct DeepLinkRequest {
    pub(crate) telegram_id: i64,
    pub(crate) action: &'static str,
}

/// Deep link returned by the server. The token correlates the later
/// verification call with this request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLink {
    #[serde(alias = "url", alias = "link")]
    pub deep_link: String,
    #[serde(alias = "auth_token", alias = "correlation_token")]
    #[serde(skip_serializing)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

#[derive(Serialize)]
pub(crate) struct VerifyRequest<'a> {
    pub(crate) token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginVerification {
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) user: Option<UserProfile>,
    #[serde(default, alias = "access_token")]
    pub(crate) token: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkVerification {
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default, alias = "telegram_account")]
    pub(crate) telegram: Option<TelegramIdentity>,
    #[serde(default)]
    pub(crate) user: Option<UserProfile>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

pub(crate) fn is_pending(status: Option<&str>) -> bool {
    status.is_some_and(|status| status.eq_ignore_ascii_case("pending"))
}
