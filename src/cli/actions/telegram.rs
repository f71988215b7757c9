use crate::{
    cli::actions::{print_json, session::restore, ClientArgs},
    telegram::{LinkOpener, NoopOpener, SystemOpener, TelegramFlow},
};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub enum Command {
    Login { telegram_id: i64 },
    Link { telegram_id: i64 },
    VerifyLogin { token: Option<String> },
    VerifyLink { token: Option<String> },
    Status,
    Unlink,
}

#[derive(Debug)]
pub struct Args {
    pub client: ClientArgs,
    pub open_links: bool,
    pub command: Command,
}

/// # Errors
/// Returns an error if the command fails.
pub async fn execute(args: Args) -> Result<()> {
    let session = args.client.session()?;
    let opener: Arc<dyn LinkOpener> = if args.open_links {
        Arc::new(SystemOpener)
    } else {
        Arc::new(NoopOpener)
    };
    let flow = TelegramFlow::new(session.clone(), opener);

    let result = run(&flow, args.command).await;
    session.dispose();
    result
}

async fn run(flow: &TelegramFlow, command: Command) -> Result<()> {
    match command {
        Command::Login { telegram_id } => {
            let link = flow.login_with_telegram(telegram_id).await?;
            print_json(&json!({ "link": link, "progress": flow.progress() }))
        }
        Command::Link { telegram_id } => {
            restore(flow.session()).await?;
            let link = flow.link_telegram_account(telegram_id).await?;
            print_json(&json!({ "link": link, "progress": flow.progress() }))
        }
        Command::VerifyLogin { token } => {
            let user = flow.verify_telegram_login(token.as_deref()).await?;
            print_json(&user)
        }
        Command::VerifyLink { token } => {
            restore(flow.session()).await?;
            let user = flow.verify_telegram_link(token.as_deref()).await?;
            print_json(&user)
        }
        Command::Status => {
            // A stored session turns this into a link check.
            if let Err(failure) = flow.session().initialize_auth().await {
                debug!("no valid session, checking as a Telegram sign-in: {failure}");
            }
            let user = flow.check_status().await?;
            print_json(&user)
        }
        Command::Unlink => {
            restore(flow.session()).await?;
            let user = flow.unlink_telegram_account().await?;
            print_json(&user)
        }
    }
}
