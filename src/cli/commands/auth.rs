use clap::{Arg, ArgAction, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_PRODUCTION: &str = "production";
pub const ARG_SEED_DEFAULTS: &str = "seed-defaults";
pub const ARG_BOOTSTRAP_ADMIN: &str = "bootstrap-admin";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_access_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret for session tokens, at least 32 bytes")
                .env("CUSTODIAN_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim written into and required from session tokens")
                .env("CUSTODIAN_TOKEN_ISSUER")
                .default_value("custodian"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token TTL in seconds")
                .env("CUSTODIAN_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token TTL in seconds")
                .env("CUSTODIAN_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PRODUCTION)
                .long(ARG_PRODUCTION)
                .help("Mark session cookies Secure")
                .env("CUSTODIAN_PRODUCTION")
                .action(ArgAction::SetTrue),
        )
}

fn with_access_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SEED_DEFAULTS)
                .long(ARG_SEED_DEFAULTS)
                .help("Create the default roles, permissions and grants at startup")
                .env("CUSTODIAN_SEED_DEFAULTS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_BOOTSTRAP_ADMIN)
                .long(ARG_BOOTSTRAP_ADMIN)
                .help("Grant the admin role to this registered email at startup")
                .env("CUSTODIAN_BOOTSTRAP_ADMIN")
                .value_name("EMAIL"),
        )
}
