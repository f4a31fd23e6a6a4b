use clap::{Arg, ArgMatches, Command};

pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_RESEND_COOLDOWN_SECONDS: &str = "otp-resend-cooldown-seconds";
pub const ARG_OTP_MAX_ATTEMPTS: &str = "otp-max-attempts";
pub const ARG_OTP_FIXED_CODE: &str = "otp-fixed-code";
pub const ARG_OTP_WEBHOOK_URL: &str = "otp-webhook-url";

#[derive(Debug)]
pub struct Options {
    pub ttl_seconds: u64,
    pub resend_cooldown_seconds: u64,
    pub max_attempts: u32,
    pub fixed_code: Option<String>,
    pub webhook_url: Option<String>,
}

impl Options {
    /// Parse one-time code arguments.
    ///
    /// # Errors
    /// Returns an error if the fixed code is not six digits.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let fixed_code = get_non_empty(ARG_OTP_FIXED_CODE);
        if let Some(code) = &fixed_code
            && !(code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()))
        {
            anyhow::bail!("--{ARG_OTP_FIXED_CODE} must be six digits");
        }

        Ok(Self {
            ttl_seconds: matches
                .get_one::<u64>(ARG_OTP_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
            resend_cooldown_seconds: matches
                .get_one::<u64>(ARG_OTP_RESEND_COOLDOWN_SECONDS)
                .copied()
                .unwrap_or(60),
            max_attempts: matches
                .get_one::<u32>(ARG_OTP_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(5),
            fixed_code,
            webhook_url: get_non_empty(ARG_OTP_WEBHOOK_URL),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("One-time code TTL in seconds")
                .env("IDECS_OTP_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_RESEND_COOLDOWN_SECONDS)
                .long(ARG_OTP_RESEND_COOLDOWN_SECONDS)
                .help("Cooldown before a code can be resent to the same target")
                .env("IDECS_OTP_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_ATTEMPTS)
                .long(ARG_OTP_MAX_ATTEMPTS)
                .help("Wrong guesses allowed before a code is discarded")
                .env("IDECS_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_FIXED_CODE)
                .long(ARG_OTP_FIXED_CODE)
                .help("Accept this code for every target (testing only)")
                .env("IDECS_OTP_FIXED_CODE"),
        )
        .arg(
            Arg::new(ARG_OTP_WEBHOOK_URL)
                .long(ARG_OTP_WEBHOOK_URL)
                .help("Gateway URL receiving codes to deliver; codes are only logged when unset")
                .env("IDECS_OTP_WEBHOOK_URL"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("idecs"))
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("IDECS_OTP_FIXED_CODE", None::<&str>),
                ("IDECS_OTP_WEBHOOK_URL", None::<&str>),
                ("IDECS_OTP_TTL_SECONDS", None::<&str>),
            ],
            || {
                let options = Options::parse(&command().get_matches_from(vec!["idecs"]))?;
                assert_eq!(options.ttl_seconds, 300);
                assert_eq!(options.resend_cooldown_seconds, 60);
                assert_eq!(options.max_attempts, 5);
                assert!(options.fixed_code.is_none());
                assert!(options.webhook_url.is_none());
                Ok(())
            },
        )
    }

    #[test]
    fn reads_env() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("IDECS_OTP_FIXED_CODE", Some("666666")),
                ("IDECS_OTP_WEBHOOK_URL", Some("http://gateway.local/otp")),
                ("IDECS_OTP_TTL_SECONDS", Some("120")),
            ],
            || {
                let options = Options::parse(&command().get_matches_from(vec!["idecs"]))?;
                assert_eq!(options.ttl_seconds, 120);
                assert_eq!(options.fixed_code.as_deref(), Some("666666"));
                assert_eq!(
                    options.webhook_url.as_deref(),
                    Some("http://gateway.local/otp")
                );
                Ok(())
            },
        )
    }

    #[test]
    fn fixed_code_must_be_six_digits() {
        let matches = command().get_matches_from(vec!["idecs", "--otp-fixed-code", "12ab"]);
        assert!(Options::parse(&matches).is_err());
    }
}
