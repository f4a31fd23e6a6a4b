use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_TICKET_TTL_SECONDS: &str = "ticket-ttl-seconds";
pub const ARG_API_SECRET: &str = "api-secret";
pub const ARG_DISABLE_REQUEST_SIGNING: &str = "disable-request-signing";
pub const ARG_SIGNATURE_WINDOW_SECONDS: &str = "signature-window-seconds";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_PASSWORD_MAX_LENGTH: &str = "password-max-length";

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub ticket_ttl_seconds: u64,
    pub api_secret: Option<SecretString>,
    pub request_signing: bool,
    pub signature_window_seconds: i64,
    pub password_min_length: usize,
    pub password_max_length: usize,
}

impl Options {
    /// Parse session, signing and password policy arguments.
    ///
    /// # Errors
    /// Returns an error if request signing is enabled without an API secret or
    /// the password bounds are inverted.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let request_signing = !matches.get_flag(ARG_DISABLE_REQUEST_SIGNING);
        let api_secret = matches
            .get_one::<String>(ARG_API_SECRET)
            .filter(|secret| !secret.trim().is_empty())
            .map(|secret| SecretString::from(secret.clone()));
        if request_signing && api_secret.is_none() {
            anyhow::bail!(
                "missing required argument: --{ARG_API_SECRET} (or --{ARG_DISABLE_REQUEST_SIGNING})"
            );
        }

        let password_min_length = matches
            .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
            .copied()
            .unwrap_or(8);
        let password_max_length = matches
            .get_one::<usize>(ARG_PASSWORD_MAX_LENGTH)
            .copied()
            .unwrap_or(20);
        if password_min_length > password_max_length {
            anyhow::bail!(
                "--{ARG_PASSWORD_MIN_LENGTH} ({password_min_length}) exceeds --{ARG_PASSWORD_MAX_LENGTH} ({password_max_length})"
            );
        }

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_default(),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(43_200),
            ticket_ttl_seconds: matches
                .get_one::<u64>(ARG_TICKET_TTL_SECONDS)
                .copied()
                .unwrap_or(60),
            api_secret,
            request_signing,
            signature_window_seconds: matches
                .get_one::<i64>(ARG_SIGNATURE_WINDOW_SECONDS)
                .copied()
                .unwrap_or(300),
            password_min_length,
            password_max_length,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_signing_args(command);
    with_password_args(command)
}

/// One year.
pub const MAX_SESSION_TTL_SECONDS: i64 = 31_536_000;

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the CORS origin")
                .long_help(
                    "Frontend base URL, used as the CORS origin. Session cookies are marked Secure when it uses https.",
                )
                .env("IDECS_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session token TTL in seconds")
                .env("IDECS_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_TICKET_TTL_SECONDS)
                .long(ARG_TICKET_TTL_SECONDS)
                .help("Login ticket TTL in seconds")
                .env("IDECS_TICKET_TTL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_signing_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_SECRET)
                .long(ARG_API_SECRET)
                .help("Shared secret for request signing")
                .env("IDECS_API_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_DISABLE_REQUEST_SIGNING)
                .long(ARG_DISABLE_REQUEST_SIGNING)
                .help("Accept unsigned /api requests (development only)")
                .env("IDECS_DISABLE_REQUEST_SIGNING")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SIGNATURE_WINDOW_SECONDS)
                .long(ARG_SIGNATURE_WINDOW_SECONDS)
                .help("Allowed clock drift of the signed timestamp in seconds")
                .env("IDECS_SIGNATURE_WINDOW_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_password_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length")
                .env("IDECS_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MAX_LENGTH)
                .long(ARG_PASSWORD_MAX_LENGTH)
                .help("Maximum password length")
                .env("IDECS_PASSWORD_MAX_LENGTH")
                .default_value("20")
                .value_parser(clap::value_parser!(usize)),
        )
}
