//! # ccp-session (China Car Parts session client)
//!
//! `ccp-session` keeps track of who is logged in to the China Car Parts API and
//! which bearer token authorizes requests on their behalf.
//!
//! ## Layers
//!
//! - [`api`]: HTTP client wrapper with a fixed base URL, timeout, and default
//!   headers. Every request goes through the [`api::TokenInterceptor`], which
//!   attaches `Authorization: Bearer <token>` from persisted storage and clears
//!   the session whenever a bearer-authorized request comes back `401`.
//! - [`session`]: the explicitly constructed [`session::SessionContext`]. It owns
//!   the in-memory profile and token and exposes login, registration, logout,
//!   startup validation, profile updates, and the token validity probe.
//! - [`telegram`]: out-of-band Telegram login and account linking built on a
//!   correlation token persisted next to the bearer token.
//! - [`storage`]: the persisted key/value store shared by the session and the
//!   linking flow.
//! - [`catalog`] and [`smoke`]: parts search and the deployment smoke test.
//! - [`cli`]: the `ccp` command-line front end.
//!
//! ## Failure model
//!
//! Store actions never panic and never leak transport errors. Every failure is
//! converted into an [`errors::ActionFailure`] carrying a kind and a
//! human-readable message taken from the server body when one is available.

pub mod api;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod errors;
pub mod session;
pub mod smoke;
pub mod storage;
pub mod telegram;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("ccp-session/"));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
