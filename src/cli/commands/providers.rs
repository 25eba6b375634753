//! Identity provider credentials and relationship targets.

use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_GITHUB_CLIENT_ID: &str = "github-client-id";
pub const ARG_GITHUB_CLIENT_SECRET: &str = "github-client-secret";
pub const ARG_GITHUB_CALLBACK_URL: &str = "github-callback-url";
pub const ARG_GITHUB_TARGET_ACCOUNT: &str = "github-target-account";

pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_GOOGLE_CALLBACK_URL: &str = "google-callback-url";
pub const ARG_YOUTUBE_TARGET_CHANNEL: &str = "youtube-target-channel";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_github_args(command);
    with_google_args(command)
}

fn with_github_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GITHUB_CLIENT_ID)
                .long(ARG_GITHUB_CLIENT_ID)
                .help("GitHub OAuth app client id")
                .env("SOCIALGATE_GITHUB_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GITHUB_CLIENT_SECRET)
                .long(ARG_GITHUB_CLIENT_SECRET)
                .help("GitHub OAuth app client secret")
                .env("SOCIALGATE_GITHUB_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_GITHUB_CALLBACK_URL)
                .long(ARG_GITHUB_CALLBACK_URL)
                .help("GitHub OAuth redirect URI (default: {public-url}/auth/github/callback)")
                .env("SOCIALGATE_GITHUB_CALLBACK_URL"),
        )
        .arg(
            Arg::new(ARG_GITHUB_TARGET_ACCOUNT)
                .long(ARG_GITHUB_TARGET_ACCOUNT)
                .help("GitHub account visitors must follow")
                .env("SOCIALGATE_GITHUB_TARGET_ACCOUNT"),
        )
}

fn with_google_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id")
                .env("SOCIALGATE_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("SOCIALGATE_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CALLBACK_URL)
                .long(ARG_GOOGLE_CALLBACK_URL)
                .help("Google OAuth redirect URI (default: {public-url}/auth/google/callback)")
                .env("SOCIALGATE_GOOGLE_CALLBACK_URL"),
        )
        .arg(
            Arg::new(ARG_YOUTUBE_TARGET_CHANNEL)
                .long(ARG_YOUTUBE_TARGET_CHANNEL)
                .help("YouTube channel id visitors must be subscribed to")
                .env("SOCIALGATE_YOUTUBE_TARGET_CHANNEL"),
        )
}

/// Credentials and target for one provider.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub client_id: String,
    pub client_secret: SecretString,
    pub callback_url: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub github: Option<ProviderOptions>,
    pub google: Option<ProviderOptions>,
}

impl Options {
    /// A provider is enabled only when its id, secret and target are all present.
    ///
    /// # Errors
    /// Returns an error when a provider is partially configured or none is enabled.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let github = provider_options(
            matches,
            "GitHub",
            [
                ARG_GITHUB_CLIENT_ID,
                ARG_GITHUB_CLIENT_SECRET,
                ARG_GITHUB_TARGET_ACCOUNT,
            ],
            ARG_GITHUB_CALLBACK_URL,
        )?;
        let google = provider_options(
            matches,
            "Google",
            [
                ARG_GOOGLE_CLIENT_ID,
                ARG_GOOGLE_CLIENT_SECRET,
                ARG_YOUTUBE_TARGET_CHANNEL,
            ],
            ARG_GOOGLE_CALLBACK_URL,
        )?;

        if github.is_none() && google.is_none() {
            bail!(
                "no provider configured: set --{ARG_GITHUB_CLIENT_ID}, \
                 --{ARG_GITHUB_CLIENT_SECRET} and --{ARG_GITHUB_TARGET_ACCOUNT}, \
                 or --{ARG_GOOGLE_CLIENT_ID}, --{ARG_GOOGLE_CLIENT_SECRET} \
                 and --{ARG_YOUTUBE_TARGET_CHANNEL}"
            );
        }

        Ok(Self { github, google })
    }
}

fn provider_options(
    matches: &ArgMatches,
    label: &str,
    [id_arg, secret_arg, target_arg]: [&str; 3],
    callback_arg: &str,
) -> Result<Option<ProviderOptions>> {
    let value = |arg: &str| {
        matches
            .get_one::<String>(arg)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    match (value(id_arg), value(secret_arg), value(target_arg)) {
        (Some(client_id), Some(client_secret), Some(target)) => Ok(Some(ProviderOptions {
            client_id,
            client_secret: SecretString::from(client_secret),
            callback_url: value(callback_arg),
            target,
        })),
        (None, None, None) => Ok(None),
        (id, secret, target) => {
            let missing: Vec<String> = [(id_arg, id), (secret_arg, secret), (target_arg, target)]
                .into_iter()
                .filter(|(_, v)| v.is_none())
                .map(|(arg, _)| format!("--{arg}"))
                .collect();
            bail!(
                "{label} provider is partially configured, missing: {}",
                missing.join(", ")
            )
        }
    }
}
