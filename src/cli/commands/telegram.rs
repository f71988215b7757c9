use clap::{Arg, ArgAction, Command};

pub const ARG_TELEGRAM_ID: &str = "telegram-id";
pub const ARG_TOKEN: &str = "token";
pub const ARG_NO_OPEN: &str = "no-open";

fn telegram_id() -> Arg {
    Arg::new(ARG_TELEGRAM_ID)
        .long("telegram-id")
        .help("Numeric Telegram user id")
        .required(true)
        .value_parser(clap::value_parser!(i64).range(1..))
}

fn token() -> Arg {
    Arg::new(ARG_TOKEN)
        .long("token")
        .help("Correlation token (default: the pending one)")
}

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command.subcommand(
        Command::new("telegram")
            .about("Telegram sign-in and account linking")
            .subcommand_required(true)
            .arg(
                Arg::new(ARG_NO_OPEN)
                    .long("no-open")
                    .help("Print deep links instead of opening them")
                    .global(true)
                    .action(ArgAction::SetTrue),
            )
            .subcommand(
                Command::new("login")
                    .about("Request a Telegram sign-in link")
                    .arg(telegram_id()),
            )
            .subcommand(
                Command::new("link")
                    .about("Request a link that attaches Telegram to this account")
                    .arg(telegram_id()),
            )
            .subcommand(
                Command::new("verify-login")
                    .about("Complete a Telegram sign-in")
                    .arg(token()),
            )
            .subcommand(
                Command::new("verify-link")
                    .about("Complete account linking")
                    .arg(token()),
            )
            .subcommand(Command::new("status").about("Verify whatever request is pending"))
            .subcommand(Command::new("unlink").about("Detach Telegram from this account")),
    )
}
