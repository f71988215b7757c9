use crate::{
    cli::actions::print_json,
    config::ClientConfig,
    session::Credentials,
    smoke::{run, SmokeOptions},
};
use anyhow::{bail, Result};
use std::time::Duration;

#[derive(Debug)]
pub struct Args {
    pub host: String,
    pub api_prefix: String,
    pub timeout: Duration,
    pub origin: String,
    pub credentials: Option<Credentials>,
}

/// Prints the report and fails when any check failed.
/// # Errors
/// Returns an error if the configuration is invalid or a check failed.
pub async fn execute(args: Args) -> Result<()> {
    let config = ClientConfig::new(args.host)
        .with_api_prefix(args.api_prefix)
        .with_timeout(args.timeout);
    let options = SmokeOptions::new(config)
        .with_origin(args.origin)
        .with_credentials(args.credentials);

    let report = run(&options).await?;
    print_json(&report)?;

    let failures = report.failures();
    if !failures.is_empty() {
        let names: Vec<&str> = failures.iter().map(|check| check.name).collect();
        bail!("smoke checks failed: {}", names.join(", "));
    }
    Ok(())
}
