use crate::smoke::DEFAULT_ORIGIN;
use clap::{Arg, Command};

pub const ARG_HOST: &str = "host";
pub const ARG_ORIGIN: &str = "origin";
pub const ARG_USERNAME: &str = "smoke-username";
pub const ARG_PASSWORD: &str = "smoke-password";

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command.subcommand(
        Command::new("smoke")
            .about("Check health, CORS and authorization of a deployment")
            .arg(
                Arg::new(ARG_HOST)
                    .long("host")
                    .help("API host to check (default: --api-url)")
                    .env("CCP_SMOKE_HOST"),
            )
            .arg(
                Arg::new(ARG_ORIGIN)
                    .long("origin")
                    .help("Origin sent with the CORS preflight")
                    .env("CCP_SMOKE_ORIGIN")
                    .default_value(DEFAULT_ORIGIN),
            )
            .arg(
                Arg::new(ARG_USERNAME)
                    .long("username")
                    .help("Also check a real login with this account")
                    .env("CCP_USERNAME")
                    .requires(ARG_PASSWORD),
            )
            .arg(
                Arg::new(ARG_PASSWORD)
                    .long("password")
                    .help("Password for the real login check")
                    .env("CCP_PASSWORD")
                    .hide_env_values(true),
            ),
    )
}
