//! Authorization-code grant plumbing shared by the adapters.

use super::HandshakeError;
use reqwest::{header::ACCEPT, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

/// Registered OAuth application for one provider.
#[derive(Clone)]
pub(crate) struct OAuthClient {
    client_id: String,
    client_secret: SecretString,
    redirect_uri: Url,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl OAuthClient {
    pub(crate) fn new(client_id: String, client_secret: SecretString, redirect_uri: Url) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Consent URL for the code flow; `extra` carries provider-specific params.
    pub(crate) fn authorize_url(
        &self,
        endpoint: &Url,
        scopes: &[&str],
        state: &str,
        extra: &[(&str, &str)],
    ) -> Url {
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_uri.as_str())
                .append_pair("response_type", "code")
                .append_pair("scope", &scopes.join(" "))
                .append_pair("state", state);
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        url
    }

    /// Exchange an authorization code for an access token.
    ///
    /// Some providers answer `200` with an `error` field for bad codes, so the
    /// body is inspected even on success.
    #[instrument(skip(self, http, code), fields(client_id = %self.client_id))]
    pub(crate) async fn exchange_code(
        &self,
        http: &Client,
        endpoint: &Url,
        code: &str,
    ) -> Result<SecretString, HandshakeError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = http
            .post(endpoint.as_str())
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| HandshakeError::transport(&e))?;

        let status = response.status();
        let body: Option<TokenResponse> = response.json().await.ok();

        debug!("token endpoint answered {}", status);

        let Some(body) = body else {
            return Err(if status.is_success() {
                HandshakeError::MalformedResponse("token response is not JSON".to_string())
            } else {
                HandshakeError::TokenRejected(status.to_string())
            });
        };

        if let Some(error) = body.error {
            let detail = body
                .error_description
                .map_or_else(|| error.clone(), |desc| format!("{error}: {desc}"));
            return Err(HandshakeError::TokenRejected(detail));
        }

        if !status.is_success() {
            return Err(HandshakeError::TokenRejected(status.to_string()));
        }

        match body.access_token {
            Some(token) if !token.is_empty() => Ok(SecretString::from(token)),
            _ => Err(HandshakeError::MalformedResponse(
                "token response carries no access_token".to_string(),
            )),
        }
    }
}

/// Append path segments to an API base URL, escaping each segment.
pub(crate) fn api_url(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn client() -> Result<OAuthClient> {
        Ok(OAuthClient::new(
            "client-1".to_string(),
            SecretString::from("s3cret".to_string()),
            Url::parse("http://localhost:8080/auth/github/callback")?,
        ))
    }

    #[test]
    fn authorize_url_carries_code_flow_params() -> Result<()> {
        let endpoint = Url::parse("https://github.com/login/oauth/authorize")?;
        let url = client()?.authorize_url(
            &endpoint,
            &["user:follow"],
            "nonce",
            &[("allow_signup", "false")],
        );

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(get("client_id").as_deref(), Some("client-1"));
        assert_eq!(
            get("redirect_uri").as_deref(),
            Some("http://localhost:8080/auth/github/callback")
        );
        assert_eq!(get("response_type").as_deref(), Some("code"));
        assert_eq!(get("scope").as_deref(), Some("user:follow"));
        assert_eq!(get("state").as_deref(), Some("nonce"));
        assert_eq!(get("allow_signup").as_deref(), Some("false"));
        assert!(!url.as_str().contains("s3cret"));
        Ok(())
    }

    #[test]
    fn api_url_escapes_segments() -> Result<()> {
        let base = Url::parse("https://api.github.com/")?;
        let url = api_url(&base, &["user", "following", "a b"]).context("no url")?;
        assert_eq!(url.as_str(), "https://api.github.com/user/following/a%20b");

        let nested = Url::parse("https://www.googleapis.com/youtube/v3")?;
        let url = api_url(&nested, &["subscriptions"]).context("no url")?;
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/youtube/v3/subscriptions"
        );
        Ok(())
    }

    #[test]
    fn debug_redacts_client_secret() -> Result<()> {
        let rendered = format!("{:?}", client()?);
        assert!(!rendered.contains("s3cret"));
        Ok(())
    }
}
