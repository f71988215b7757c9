pub mod session;
pub mod smoke;
pub mod telegram;

mod run;

use crate::{
    config::ClientConfig,
    session::SessionContext,
    storage::{FileStore, KeyValueStore},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Connection settings shared by every command.
#[derive(Clone, Debug)]
pub struct ClientArgs {
    pub api_url: String,
    pub api_prefix: String,
    pub timeout: Duration,
    pub storage_path: PathBuf,
}

impl ClientArgs {
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.api_url)
            .with_api_prefix(&self.api_prefix)
            .with_timeout(self.timeout)
    }

    /// # Errors
    /// Returns an error if the client configuration is invalid.
    pub fn session(&self) -> Result<SessionContext> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&self.storage_path));
        SessionContext::new(&self.config(), store).context("failed to build API client")
    }
}

#[derive(Debug)]
pub enum Action {
    Session(session::Args),
    Telegram(telegram::Args),
    Smoke(smoke::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        run::execute(self).await
    }
}

/// Writes command output to stdout as pretty JSON.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
