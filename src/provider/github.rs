//! GitHub adapter: gate on "follows target account".

use super::{
    credentials_for,
    oauth::{api_url, OAuthClient},
    BeginHandshake, CallbackPayload, CheckError, HandshakeError, Identity, ProviderAdapter,
    ProviderKind, RelationshipResult,
};
use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    Client, RequestBuilder, StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const SCOPES: &[&str] = &["user:follow"];

#[derive(Clone, Debug)]
pub struct GitHubConfig {
    oauth: OAuthClient,
    target_account: String,
    authorize_url: Url,
    token_url: Url,
    api_base: Url,
}

impl GitHubConfig {
    /// Config pointing at github.com.
    ///
    /// # Errors
    /// Only fails if the built-in endpoint constants stop parsing.
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        callback_url: Url,
        target_account: String,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            oauth: OAuthClient::new(client_id, client_secret, callback_url),
            target_account,
            authorize_url: Url::parse(AUTHORIZE_URL)?,
            token_url: Url::parse(TOKEN_URL)?,
            api_base: Url::parse(API_BASE)?,
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
    pub fn with_api_base(mut self, url: Url) -> Self {
        self.api_base = url;
        self
    }
}

#[derive(Clone, Debug)]
pub struct GitHubAdapter {
    config: GitHubConfig,
    http: Client,
}

impl GitHubAdapter {
    #[must_use]
    pub fn new(config: GitHubConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn api_get(&self, url: Url, token: &SecretString) -> RequestBuilder {
        self.http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
    }

    async fn fetch_profile(&self, token: &SecretString) -> Result<Value, HandshakeError> {
        let url = api_url(&self.config.api_base, &["user"]).ok_or_else(|| {
            HandshakeError::ProfileUnavailable("invalid GitHub API base".to_string())
        })?;

        let response = self
            .api_get(url, token)
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
impl ProviderAdapter for GitHubAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn target(&self) -> &str {
        &self.config.target_account
    }

    fn scopes(&self) -> &'static [&'static str] {
        SCOPES
    }

    fn begin_handshake(&self, state: &str) -> BeginHandshake {
        BeginHandshake {
            authorize_url: self
                .config
                .oauth
                .authorize_url(&self.config.authorize_url, self.scopes(), state, &[]),
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

        let subject = match profile.get("id") {
            Some(Value::Number(id)) => id.to_string(),
            _ => profile
                .get("login")
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| {
                    HandshakeError::ProfileUnavailable("profile has no id or login".to_string())
                })?,
        };

        debug!(subject = %subject, "GitHub handshake complete");

        Ok(Identity::new(ProviderKind::GitHub, subject, profile, token))
    }

    #[instrument(
        skip(self, identity),
        fields(subject = %identity.subject(), target = %self.config.target_account)
    )]
    async fn check_relationship(
        &self,
        identity: &Identity,
    ) -> Result<RelationshipResult, CheckError> {
        let token = credentials_for(ProviderKind::GitHub, identity)?;

        let url = api_url(
            &self.config.api_base,
            &["user", "following", &self.config.target_account],
        )
        .ok_or_else(|| CheckError::MalformedResponse("invalid GitHub API base".to_string()))?;

        let response = self
            .api_get(url, token)
            .send()
            .await
            .map_err(|e| CheckError::transport(&e))?;

        // 204 means "is following", 404 means "is not following".
        let satisfied = match response.status() {
            StatusCode::NO_CONTENT => true,
            StatusCode::NOT_FOUND => false,
            status => return Err(CheckError::from_status(status)),
        };

        debug!(satisfied, "GitHub follow check");

        Ok(RelationshipResult::checked_now(
            ProviderKind::GitHub,
            satisfied,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CallbackQuery;
    use anyhow::{Context, Result};
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn adapter(server: &MockServer) -> Result<GitHubAdapter> {
        adapter_with_client(server, Client::new()).await
    }

    async fn adapter_with_client(server: &MockServer, client: Client) -> Result<GitHubAdapter> {
        let base = Url::parse(&server.uri())?;
        let config = GitHubConfig::new(
            "gh-client".to_string(),
            SecretString::from("gh-secret".to_string()),
            Url::parse("http://localhost:8080/auth/github/callback")?,
            "octo target".to_string(),
        )?
        .with_authorize_url(base.join("/login/oauth/authorize")?)
        .with_token_url(base.join("/login/oauth/access_token")?)
        .with_api_base(base);
        Ok(GitHubAdapter::new(config, client))
    }

    fn payload(code: &str) -> CallbackPayload {
        CallbackPayload::new(
            CallbackQuery {
                code: Some(code.to_string()),
                state: Some("nonce".to_string()),
                ..CallbackQuery::default()
            },
            Some("nonce".to_string()),
        )
    }

    async fn mount_token_and_profile(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_string_contains("code=good-code"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "gho_token"})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer gho_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 583231, "login": "octocat"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn begin_handshake_requests_follow_scope() -> Result<()> {
        let server = MockServer::start().await;
        let adapter = adapter(&server).await?;
        let begin = adapter.begin_handshake("nonce");
        assert_eq!(begin.authorize_url.path(), "/login/oauth/authorize");
        let scope = begin
            .authorize_url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned())
            .context("missing scope")?;
        assert_eq!(scope, "user:follow");
        Ok(())
    }

    #[tokio::test]
    async fn complete_handshake_builds_identity() -> Result<()> {
        let server = MockServer::start().await;
        mount_token_and_profile(&server).await;
        let adapter = adapter(&server).await?;

        let identity = adapter.complete_handshake(&payload("good-code")).await?;
        assert_eq!(identity.provider(), ProviderKind::GitHub);
        assert_eq!(identity.subject(), "583231");
        assert_eq!(identity.raw_profile()["login"], "octocat");
        Ok(())
    }

    #[tokio::test]
    async fn bad_verification_code_is_rejected() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&server)
            .await;
        let adapter = adapter(&server).await?;

        let result = adapter.complete_handshake(&payload("expired")).await;
        assert!(matches!(result, Err(HandshakeError::TokenRejected(_))));
        Ok(())
    }

    #[tokio::test]
    async fn follow_check_maps_status_signal() -> Result<()> {
        let server = MockServer::start().await;
        mount_token_and_profile(&server).await;
        Mock::given(method("GET"))
            .and(path("/user/following/octo%20target"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let adapter = adapter(&server).await?;
        let identity = adapter.complete_handshake(&payload("good-code")).await?;

        let first = adapter.check_relationship(&identity).await?;
        let second = adapter.check_relationship(&identity).await?;
        assert!(first.satisfied());
        assert_eq!(first.satisfied(), second.satisfied());
        assert_eq!(first.provider(), ProviderKind::GitHub);
        Ok(())
    }

    #[tokio::test]
    async fn not_following_is_a_successful_result() -> Result<()> {
        let server = MockServer::start().await;
        mount_token_and_profile(&server).await;
        Mock::given(method("GET"))
            .and(path("/user/following/octo%20target"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let adapter = adapter(&server).await?;
        let identity = adapter.complete_handshake(&payload("good-code")).await?;

        let result = adapter.check_relationship(&identity).await?;
        assert!(!result.satisfied());
        Ok(())
    }

    #[tokio::test]
    async fn revoked_token_is_a_check_error() -> Result<()> {
        let server = MockServer::start().await;
        mount_token_and_profile(&server).await;
        Mock::given(method("GET"))
            .and(path("/user/following/octo%20target"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let adapter = adapter(&server).await?;
        let identity = adapter.complete_handshake(&payload("good-code")).await?;

        let result = adapter.check_relationship(&identity).await;
        assert_eq!(result, Err(CheckError::Unauthorized(401)));
        Ok(())
    }

    #[tokio::test]
    async fn slow_token_endpoint_is_a_handshake_timeout() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "gho_token"}))
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()?;
        let adapter = adapter_with_client(&server, client).await?;

        let result = adapter.complete_handshake(&payload("good-code")).await;
        assert_eq!(
            result.map(|identity| identity.subject().to_string()),
            Err(HandshakeError::Timeout)
        );
        Ok(())
    }
}
