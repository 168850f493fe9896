use crate::cli::{
    actions::{server::Args, Action},
    commands::{
        ARG_ADMIN_TOKEN, ARG_DB_MAX_CONNECTIONS, ARG_DSN, ARG_EXPOSE_OTP, ARG_OTP_TTL, ARG_PORT,
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --dsn")?;

    let db_max_connections = matches
        .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(5);
    let otp_ttl_seconds = matches.get_one::<u32>(ARG_OTP_TTL).copied().unwrap_or(300);
    let expose_otp = matches
        .get_one::<bool>(ARG_EXPOSE_OTP)
        .copied()
        .unwrap_or(true);
    let admin_token = matches
        .get_one::<String>(ARG_ADMIN_TOKEN)
        .filter(|token| !token.trim().is_empty())
        .cloned()
        .map(SecretString::from);

    Ok(Action::Server(Args {
        port,
        dsn,
        db_max_connections,
        otp_ttl_seconds,
        expose_otp,
        admin_token,
    }))
}
