use clap::{Arg, Command};

pub const ARG_API_URL: &str = "api-url";
pub const ARG_API_PREFIX: &str = "api-prefix";
pub const ARG_TIMEOUT: &str = "timeout";
pub const ARG_STORAGE: &str = "storage";

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_URL)
                .long("api-url")
                .help("API host, without the versioned prefix")
                .env("CCP_API_URL")
                .global(true)
                .default_value(DEFAULT_API_URL),
        )
        .arg(
            Arg::new(ARG_API_PREFIX)
                .long("api-prefix")
                .help("Versioned API path prefix")
                .env("CCP_API_PREFIX")
                .global(true)
                .default_value("/api/v1"),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .long("timeout")
                .help("Request timeout in seconds")
                .env("CCP_TIMEOUT_SECONDS")
                .global(true)
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_STORAGE)
                .long("storage")
                .help("Session file (default: <config dir>/ccp/session.json)")
                .env("CCP_STORAGE_PATH")
                .global(true)
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
}
