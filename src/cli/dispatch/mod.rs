//! Maps parsed CLI arguments to the action the binary executes.

use crate::cli::actions::{
    Action,
    server::{Args, StorageBackend},
};
use crate::cli::commands::{ARG_DSN, ARG_IN_MEMORY, ARG_PORT, auth, otp};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let storage = if matches.get_flag(ARG_IN_MEMORY) {
        StorageBackend::Memory
    } else {
        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .filter(|dsn| !dsn.trim().is_empty())
            .cloned()
            .context("missing required argument: --dsn")?;
        StorageBackend::Postgres(SecretString::from(dsn))
    };

    let auth_opts = auth::Options::parse(matches)?;
    let otp_opts = otp::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        storage,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        ticket_ttl_seconds: auth_opts.ticket_ttl_seconds,
        api_secret: auth_opts.api_secret,
        request_signing: auth_opts.request_signing,
        signature_window_seconds: auth_opts.signature_window_seconds,
        password_min_length: auth_opts.password_min_length,
        password_max_length: auth_opts.password_max_length,
        otp_ttl_seconds: otp_opts.ttl_seconds,
        otp_resend_cooldown_seconds: otp_opts.resend_cooldown_seconds,
        otp_max_attempts: otp_opts.max_attempts,
        otp_fixed_code: otp_opts.fixed_code,
        otp_webhook_url: otp_opts.webhook_url,
    }))
}
