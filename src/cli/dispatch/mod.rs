use crate::cli::{
    actions::{server::Args, Action},
    commands::{auth, ARG_VERBOSITY},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::Level;

/// Level requested through `-v` or `CUSTODIAN_LOG_LEVEL`.
/// `None` leaves telemetry on its `RUST_LOG`/error default.
#[must_use]
pub fn log_level(matches: &clap::ArgMatches) -> Option<Level> {
    let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    let levels = [Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    verbosity
        .checked_sub(1)
        .map(|index| levels[usize::from(index).min(levels.len() - 1)])
}

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let token_secret = matches
        .get_one::<String>(auth::ARG_TOKEN_SECRET)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --token-secret")?;
    let token_issuer = matches
        .get_one::<String>(auth::ARG_TOKEN_ISSUER)
        .cloned()
        .context("missing required argument: --token-issuer")?;
    let access_ttl_seconds = matches
        .get_one::<i64>(auth::ARG_ACCESS_TTL)
        .copied()
        .context("missing required argument: --access-token-ttl-seconds")?;
    let refresh_ttl_seconds = matches
        .get_one::<i64>(auth::ARG_REFRESH_TTL)
        .copied()
        .context("missing required argument: --refresh-token-ttl-seconds")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret,
        token_issuer,
        access_ttl_seconds,
        refresh_ttl_seconds,
        production: matches.get_flag(auth::ARG_PRODUCTION),
        seed_defaults: matches.get_flag(auth::ARG_SEED_DEFAULTS),
        bootstrap_admin: matches.get_one::<String>(auth::ARG_BOOTSTRAP_ADMIN).cloned(),
    }))
}
