use crate::cli::actions::{session, smoke, telegram, Action};
use anyhow::Result;

/// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Session(args) => session::execute(args).await,
        Action::Telegram(args) => telegram::execute(args).await,
        Action::Smoke(args) => smoke::execute(args).await,
    }
}
