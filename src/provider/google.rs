//! Google adapter: gate on "subscribed to a YouTube channel".

use super::{
    credentials_for,
    oauth::{api_url, OAuthClient},
    BeginHandshake, CallbackPayload, CheckError, HandshakeError, Identity, ProviderAdapter,
    ProviderKind, RelationshipResult,
};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const SUBSCRIBE_PROMPT_BASE: &str = "https://www.youtube.com/channel/";
const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.readonly",
    "profile",
    "email",
];

/// Provider-hosted page asking the visitor to subscribe to `channel`.
///
/// # Errors
/// Returns an error if the channel id cannot form a URL path segment.
pub fn subscription_prompt_url(channel: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(SUBSCRIBE_PROMPT_BASE)?;
    url.path_segments_mut()
        .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(channel);
    url.query_pairs_mut().append_pair("sub_confirmation", "1");
    Ok(url)
}

#[derive(Clone, Debug)]
pub struct GoogleConfig {
    oauth: OAuthClient,
    target_channel: String,
    authorize_url: Url,
    token_url: Url,
    userinfo_url: Url,
    youtube_api_base: Url,
}

impl GoogleConfig {
    /// Config pointing at Google's production endpoints.
    ///
    /// # Errors
    /// Only fails if the built-in endpoint constants stop parsing.
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        callback_url: Url,
        target_channel: String,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            oauth: OAuthClient::new(client_id, client_secret, callback_url),
            target_channel,
            authorize_url: Url::parse(AUTHORIZE_URL)?,
            token_url: Url::parse(TOKEN_URL)?,
            userinfo_url: Url::parse(USERINFO_URL)?,
            youtube_api_base: Url::parse(YOUTUBE_API_BASE)?,
        })
    }

    #[must_use]
    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    #[must_use]
    pub fn with_youtube_api_base(mut self, url: Url) -> Self {
        self.youtube_api_base = url;
        self
    }
}

/// `subscriptions.list` page; only the item count matters.
#[derive(Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct GoogleAdapter {
    config: GoogleConfig,
    http: Client,
}

impl GoogleAdapter {
    #[must_use]
    pub fn new(config: GoogleConfig, http: Client) -> Self {
        Self { config, http }
    }

    async fn fetch_profile(&self, token: &SecretString) -> Result<Value, HandshakeError> {
        let response = self
            .http
            .get(self.config.userinfo_url.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .send()
            .await
            .map_err(|e| HandshakeError::transport(&e))?;

        if !response.status().is_success() {
            return Err(HandshakeError::ProfileUnavailable(
                response.status().to_string(),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| HandshakeError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn target(&self) -> &str {
        &self.config.target_channel
    }

    fn scopes(&self) -> &'static [&'static str] {
        SCOPES
    }

    fn begin_handshake(&self, state: &str) -> BeginHandshake {
        BeginHandshake {
            authorize_url: self.config.oauth.authorize_url(
                &self.config.authorize_url,
                self.scopes(),
                state,
                &[
                    ("access_type", "online"),
                    ("include_granted_scopes", "true"),
                ],
            ),
        }
    }

    #[instrument(skip(self, payload))]
    async fn complete_handshake(
        &self,
        payload: &CallbackPayload,
    ) -> Result<Identity, HandshakeError> {
        let code = payload.authorization_code()?;

        let token = self
            .config
            .oauth
            .exchange_code(&self.http, &self.config.token_url, code)
            .await?;

        let profile = self.fetch_profile(&token).await?;

        let subject = profile
            .get("sub")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| HandshakeError::ProfileUnavailable("profile has no sub".to_string()))?;

        debug!(subject = %subject, "Google handshake complete");

        Ok(Identity::new(ProviderKind::Google, subject, profile, token))
    }

    #[instrument(
        skip(self, identity),
        fields(subject = %identity.subject(), target = %self.config.target_channel)
    )]
    async fn check_relationship(
        &self,
        identity: &Identity,
    ) -> Result<RelationshipResult, CheckError> {
        let token = credentials_for(ProviderKind::Google, identity)?;

        let url = api_url(&self.config.youtube_api_base, &["subscriptions"]).ok_or_else(|| {
            CheckError::MalformedResponse("invalid YouTube API base".to_string())
        })?;

        let response = self
            .http
            .get(url)
            .query(&[
                ("part", "snippet"),
                ("mine", "true"),
                ("forChannelId", self.config.target_channel.as_str()),
            ])
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .send()
            .await
            .map_err(|e| CheckError::transport(&e))?;

        if !response.status().is_success() {
            return Err(CheckError::from_status(response.status()));
        }

        let list: SubscriptionList = response
            .json()
            .await
            .map_err(|e| CheckError::MalformedResponse(e.to_string()))?;

        let satisfied = !list.items.is_empty();

        debug!(satisfied, "YouTube subscription check");

        Ok(RelationshipResult::checked_now(
            ProviderKind::Google,
            satisfied,
        ))
    }
}
