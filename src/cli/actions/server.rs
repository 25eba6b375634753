use crate::{
    gate::{self, GateState, SessionConfig},
    navigation::NavigationResolver,
    orchestrator::GatingOrchestrator,
    provider::{
        github::{GitHubAdapter, GitHubConfig},
        google::{subscription_prompt_url, GoogleAdapter, GoogleConfig},
        ProviderKind,
    },
    session::MemorySessionStore,
    APP_USER_AGENT,
};
use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct ProviderArgs {
    pub client_id: String,
    pub client_secret: SecretString,
    pub callback_url: Url,
    pub target: String,
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub public_url: Url,
    pub github: Option<ProviderArgs>,
    pub google: Option<ProviderArgs>,
    pub session_secret: SecretString,
    pub session_ttl_seconds: u64,
    pub provider_timeout_seconds: u64,
}

impl Args {
    /// Providers this server will gate on, in route order.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderKind> {
        [
            (ProviderKind::GitHub, self.github.is_some()),
            (ProviderKind::Google, self.google.is_some()),
        ]
        .into_iter()
        .filter_map(|(kind, enabled)| enabled.then_some(kind))
        .collect()
    }
}

/// Wire adapters, session store and orchestrator, then serve.
///
/// # Errors
/// Returns an error if the HTTP client or provider config cannot be built, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let provider_timeout = Duration::from_secs(args.provider_timeout_seconds);

    let http = Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(provider_timeout)
        .timeout(provider_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let store = Arc::new(MemorySessionStore::new(Duration::from_secs(
        args.session_ttl_seconds,
    )));

    let mut orchestrator = GatingOrchestrator::new(store)
        .with_handshake_timeout(provider_timeout)
        .with_check_timeout(provider_timeout);
    let mut navigation = NavigationResolver::new();

    if let Some(github) = args.github {
        info!(target_account = %github.target, "GitHub provider enabled");
        let config = GitHubConfig::new(
            github.client_id,
            github.client_secret,
            github.callback_url,
            github.target,
        )
        .context("Failed to build GitHub config")?;
        orchestrator =
            orchestrator.with_adapter(Arc::new(GitHubAdapter::new(config, http.clone())));
    }

    if let Some(google) = args.google {
        info!(target_channel = %google.target, "Google provider enabled");
        let prompt = subscription_prompt_url(&google.target)
            .context("Failed to build YouTube subscription URL")?;
        navigation = navigation.with_subscription_prompt(prompt);

        let config = GoogleConfig::new(
            google.client_id,
            google.client_secret,
            google.callback_url,
            google.target,
        )
        .context("Failed to build Google config")?;
        orchestrator =
            orchestrator.with_adapter(Arc::new(GoogleAdapter::new(config, http.clone())));
    }

    let session = SessionConfig::new(args.session_secret)
        .with_ttl_seconds(args.session_ttl_seconds)
        .with_secure(args.public_url.scheme() == "https");

    let state = Arc::new(GateState::new(orchestrator, navigation, session));

    gate::new(args.port, state).await
}
