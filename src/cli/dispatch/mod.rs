//! Map validated CLI matches to the server action.

use crate::cli::actions::{
    server::{Args, ProviderArgs},
    Action,
};
use crate::cli::commands::{
    self,
    providers::{self, ProviderOptions},
    session,
};
use crate::provider::ProviderKind;
use anyhow::{bail, Context, Result};
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let public_url = matches
        .get_one::<String>(commands::ARG_PUBLIC_URL)
        .context("missing required argument: --public-url")?;
    let public_url = Url::parse(public_url)
        .with_context(|| format!("invalid --{}: {public_url}", commands::ARG_PUBLIC_URL))?;
    if !matches!(public_url.scheme(), "http" | "https") {
        bail!("--{} must be an http(s) URL", commands::ARG_PUBLIC_URL);
    }

    let provider_opts = providers::Options::parse(matches)?;
    let session_opts = session::Options::parse(matches)?;

    let github = provider_opts
        .github
        .map(|opts| provider_args(opts, ProviderKind::GitHub, &public_url))
        .transpose()?;
    let google = provider_opts
        .google
        .map(|opts| provider_args(opts, ProviderKind::Google, &public_url))
        .transpose()?;

    Ok(Action::Server(Args {
        port,
        public_url,
        github,
        google,
        session_secret: session_opts.secret,
        session_ttl_seconds: session_opts.ttl_seconds,
        provider_timeout_seconds: session_opts.provider_timeout_seconds,
    }))
}

fn provider_args(
    opts: ProviderOptions,
    provider: ProviderKind,
    public_url: &Url,
) -> Result<ProviderArgs> {
    let callback_url = match opts.callback_url {
        Some(url) => {
            Url::parse(&url).with_context(|| format!("invalid {provider} callback URL: {url}"))?
        }
        None => default_callback_url(public_url, provider)?,
    };

    Ok(ProviderArgs {
        client_id: opts.client_id,
        client_secret: opts.client_secret,
        callback_url,
        target: opts.target,
    })
}

/// `{public-url}/auth/{provider}/callback`, keeping any path prefix of the public URL.
fn default_callback_url(public_url: &Url, provider: ProviderKind) -> Result<Url> {
    let base = public_url.as_str().trim_end_matches('/');
    let url = format!("{base}/auth/{}/callback", provider.slug());
    Url::parse(&url).with_context(|| format!("invalid {provider} callback URL: {url}"))
}
