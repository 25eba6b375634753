use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PROVIDER_TIMEOUT_SECONDS: &str = "provider-timeout-seconds";

const MIN_SESSION_SECRET_BYTES: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("Secret mixed into session ids, at least 32 bytes")
                .env("SOCIALGATE_SESSION_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie and store TTL in seconds")
                .env("SOCIALGATE_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PROVIDER_TIMEOUT_SECONDS)
                .long(ARG_PROVIDER_TIMEOUT_SECONDS)
                .help("Upper bound for each provider handshake and relationship check")
                .env("SOCIALGATE_PROVIDER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: SecretString,
    pub ttl_seconds: u64,
    pub provider_timeout_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the session secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_SESSION_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --session-secret")?;

        if secret.expose_secret().len() < MIN_SESSION_SECRET_BYTES {
            bail!("--{ARG_SESSION_SECRET} must be at least {MIN_SESSION_SECRET_BYTES} bytes");
        }

        Ok(Self {
            secret,
            ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(86_400),
            provider_timeout_seconds: matches
                .get_one::<u64>(ARG_PROVIDER_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
        })
    }
}
