use clap::{Arg, ArgAction, Command};

pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_EMAIL: &str = "email";
pub const ARG_FIRST_NAME: &str = "first-name";
pub const ARG_LAST_NAME: &str = "last-name";
pub const ARG_PHONE: &str = "phone";
pub const ARG_SET: &str = "set";
pub const ARG_PREFERENCES: &str = "preferences";
pub const ARG_QUERY: &str = "query";
pub const ARG_PAGE: &str = "page";
pub const ARG_LIMIT: &str = "limit";

fn username() -> Arg {
    Arg::new(ARG_USERNAME)
        .short('u')
        .long("username")
        .help("Account username")
        .env("CCP_USERNAME")
        .required(true)
}

fn password() -> Arg {
    Arg::new(ARG_PASSWORD)
        .short('p')
        .long("password")
        .help("Account password")
        .env("CCP_PASSWORD")
        .hide_env_values(true)
        .required(true)
}

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command
        .subcommand(
            Command::new("login")
                .about("Sign in and persist the session token")
                .arg(username())
                .arg(password()),
        )
        .subcommand(
            Command::new("register")
                .about("Create an account and sign in")
                .arg(username())
                .arg(password())
                .arg(
                    Arg::new(ARG_EMAIL)
                        .short('e')
                        .long("email")
                        .help("Email address")
                        .required(true),
                )
                .arg(Arg::new(ARG_FIRST_NAME).long("first-name").help("First name"))
                .arg(Arg::new(ARG_LAST_NAME).long("last-name").help("Last name"))
                .arg(Arg::new(ARG_PHONE).long("phone").help("Phone number")),
        )
        .subcommand(Command::new("logout").about("Sign out and forget the session token"))
        .subcommand(Command::new("whoami").about("Validate the stored session and print the profile"))
        .subcommand(
            Command::new("update")
                .about("Update profile fields")
                .arg(
                    Arg::new(ARG_SET)
                        .long("set")
                        .help("Field assignment, KEY=VALUE; VALUE is parsed as JSON when possible")
                        .value_name("KEY=VALUE")
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_PREFERENCES)
                        .long("preferences")
                        .help("Apply the assignments to preferences instead of profile fields")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("refresh").about("Check that the stored token is still accepted"))
        .subcommand(
            Command::new("search")
                .about("Search the parts catalog")
                .arg(Arg::new(ARG_QUERY).help("Search text").required(true))
                .arg(
                    Arg::new(ARG_PAGE)
                        .long("page")
                        .default_value("1")
                        .value_parser(clap::value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new(ARG_LIMIT)
                        .long("limit")
                        .default_value("20")
                        .value_parser(clap::value_parser!(u32).range(1..)),
                ),
        )
}
