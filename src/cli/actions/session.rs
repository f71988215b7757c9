use crate::{
    catalog::{search_parts, SearchQuery},
    cli::actions::{print_json, ClientArgs},
    session::{Credentials, Registration, SessionContext, UserProfile},
};
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug)]
pub enum Command {
    Login(Credentials),
    Register(Registration),
    Logout,
    Whoami,
    Update { changes: Value, preferences: bool },
    Refresh,
    Search(SearchQuery),
}

#[derive(Debug)]
pub struct Args {
    pub client: ClientArgs,
    pub command: Command,
}

/// Restores the persisted session; commands that need one fail without it.
pub(crate) async fn restore(session: &SessionContext) -> Result<UserProfile> {
    session
        .initialize_auth()
        .await?
        .ok_or_else(|| anyhow!("not signed in, run `ccp login` first"))
}

/// # Errors
/// Returns an error if the command fails.
pub async fn execute(args: Args) -> Result<()> {
    let session = args.client.session()?;
    debug!("session file {}", args.client.storage_path.display());

    let result = run(&session, args.command).await;
    session.dispose();
    result
}

async fn run(session: &SessionContext, command: Command) -> Result<()> {
    match command {
        Command::Login(credentials) => {
            session.login(&credentials).await?;
            print_json(&session.snapshot())
        }
        Command::Register(registration) => {
            session.register(&registration).await?;
            print_json(&session.snapshot())
        }
        Command::Logout => {
            session.logout().await;
            print_json(&json!({ "logged_out": true }))
        }
        Command::Whoami => {
            restore(session).await?;
            print_json(&session.snapshot())
        }
        Command::Update {
            changes,
            preferences,
        } => {
            restore(session).await?;
            let user = if preferences {
                session.update_preferences(&changes).await?
            } else {
                session.update_user(&changes).await?
            };
            print_json(&user)
        }
        Command::Refresh => {
            let user = session.refresh_token().await?;
            print_json(&user)
        }
        Command::Search(query) => {
            let page = search_parts(session.api(), &query).await?;
            print_json(&page)
        }
    }
}
