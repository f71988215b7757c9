use crate::{
    catalog::SearchQuery,
    cli::{
        actions::{session, smoke, telegram, Action, ClientArgs},
        commands::{client, session as session_args, smoke as smoke_args, telegram as telegram_args},
    },
    session::{Credentials, Registration},
    storage::FileStore,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use serde_json::{Map, Value};
use std::{path::PathBuf, time::Duration};

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

fn client_args(matches: &ArgMatches) -> Result<ClientArgs> {
    Ok(ClientArgs {
        api_url: required(matches, client::ARG_API_URL)?,
        api_prefix: required(matches, client::ARG_API_PREFIX)?,
        timeout: Duration::from_secs(matches.get_one::<u64>(client::ARG_TIMEOUT).copied().unwrap_or(10)),
        storage_path: matches
            .get_one::<PathBuf>(client::ARG_STORAGE)
            .cloned()
            .unwrap_or_else(FileStore::default_path),
    })
}

fn credentials(matches: &ArgMatches) -> Result<Credentials> {
    Ok(Credentials::new(
        required(matches, session_args::ARG_USERNAME)?,
        required(matches, session_args::ARG_PASSWORD)?,
    ))
}

/// Parses `KEY=VALUE`. The value is taken as JSON when it parses, otherwise as a string.
fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{assignment}'"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{assignment}'");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn changes(matches: &ArgMatches) -> Result<Value> {
    let mut changes = Map::new();
    for assignment in matches
        .get_many::<String>(session_args::ARG_SET)
        .into_iter()
        .flatten()
    {
        let (key, value) = parse_assignment(assignment)?;
        changes.insert(key, value);
    }
    Ok(Value::Object(changes))
}

fn session_command(name: &str, sub: &ArgMatches) -> Result<session::Command> {
    let command = match name {
        "login" => session::Command::Login(credentials(sub)?),
        "register" => {
            let registration = Registration::new(
                required(sub, session_args::ARG_USERNAME)?,
                required(sub, session_args::ARG_EMAIL)?,
                required(sub, session_args::ARG_PASSWORD)?,
            )
            .with_name(
                sub.get_one::<String>(session_args::ARG_FIRST_NAME).cloned(),
                sub.get_one::<String>(session_args::ARG_LAST_NAME).cloned(),
            )
            .with_phone(sub.get_one::<String>(session_args::ARG_PHONE).cloned());
            session::Command::Register(registration)
        }
        "logout" => session::Command::Logout,
        "whoami" => session::Command::Whoami,
        "update" => session::Command::Update {
            changes: changes(sub)?,
            preferences: sub.get_flag(session_args::ARG_PREFERENCES),
        },
        "refresh" => session::Command::Refresh,
        "search" => {
            let query = SearchQuery::new(required(sub, session_args::ARG_QUERY)?)
                .with_page(sub.get_one::<u32>(session_args::ARG_PAGE).copied().unwrap_or(1))
                .with_limit(
                    sub.get_one::<u32>(session_args::ARG_LIMIT)
                        .copied()
                        .unwrap_or(crate::catalog::DEFAULT_PAGE_SIZE),
                );
            session::Command::Search(query)
        }
        other => bail!("unknown command: {other}"),
    };
    Ok(command)
}

fn telegram_command(matches: &ArgMatches) -> Result<telegram::Command> {
    let telegram_id = |sub: &ArgMatches| {
        sub.get_one::<i64>(telegram_args::ARG_TELEGRAM_ID)
            .copied()
            .context("missing required argument: --telegram-id")
    };
    let token = |sub: &ArgMatches| sub.get_one::<String>(telegram_args::ARG_TOKEN).cloned();

    let command = match matches.subcommand() {
        Some(("login", sub)) => telegram::Command::Login {
            telegram_id: telegram_id(sub)?,
        },
        Some(("link", sub)) => telegram::Command::Link {
            telegram_id: telegram_id(sub)?,
        },
        Some(("verify-login", sub)) => telegram::Command::VerifyLogin { token: token(sub) },
        Some(("verify-link", sub)) => telegram::Command::VerifyLink { token: token(sub) },
        Some(("status", _)) => telegram::Command::Status,
        Some(("unlink", _)) => telegram::Command::Unlink,
        _ => bail!("missing telegram subcommand"),
    };
    Ok(command)
}

fn smoke_action(matches: &ArgMatches, sub: &ArgMatches) -> Result<smoke::Args> {
    let client = client_args(matches)?;
    let credentials = match (
        sub.get_one::<String>(smoke_args::ARG_USERNAME),
        sub.get_one::<String>(smoke_args::ARG_PASSWORD),
    ) {
        (Some(username), Some(password)) => Some(Credentials::new(username, password)),
        _ => None,
    };

    Ok(smoke::Args {
        host: sub
            .get_one::<String>(smoke_args::ARG_HOST)
            .cloned()
            .unwrap_or(client.api_url),
        api_prefix: client.api_prefix,
        timeout: client.timeout,
        origin: required(sub, smoke_args::ARG_ORIGIN)?,
        credentials,
    })
}

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("telegram", sub)) => Ok(Action::Telegram(telegram::Args {
            client: client_args(matches)?,
            open_links: !sub.get_flag(telegram_args::ARG_NO_OPEN),
            command: telegram_command(sub)?,
        })),
        Some(("smoke", sub)) => Ok(Action::Smoke(smoke_action(matches, sub)?)),
        Some((name, sub)) => Ok(Action::Session(session::Args {
            client: client_args(matches)?,
            command: session_command(name, sub)?,
        })),
        None => bail!("missing command"),
    }
}
