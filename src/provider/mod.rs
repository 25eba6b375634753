//! Provider adapters: OAuth handshake plus one relationship check per provider.
//!
//! An adapter owns everything provider specific (endpoints, scopes, response
//! shapes). The orchestrator only sees the [`ProviderAdapter`] contract and the
//! provider-neutral values defined here.

pub mod error;
pub mod github;
pub mod google;
pub(crate) mod oauth;

pub use error::{CheckError, HandshakeError};
pub use github::{GitHubAdapter, GitHubConfig};
pub use google::{GoogleAdapter, GoogleConfig};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use url::Url;

/// Identity providers the gate knows how to talk to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// GitHub account, gated on following a target account.
    #[serde(rename = "github")]
    GitHub,
    /// Google account, gated on a YouTube channel subscription.
    #[serde(rename = "google")]
    Google,
}

impl ProviderKind {
    pub const ALL: [Self; 2] = [Self::GitHub, Self::Google];

    /// Path segment used by the `/auth/:provider` routes.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.slug() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// Provider-authenticated profile for one session.
///
/// The access token lives only as long as the orchestration step that uses it;
/// it is skipped when the identity is serialized into the session.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    provider: ProviderKind,
    subject: String,
    raw_profile: Value,
    #[serde(skip)]
    access_token: Option<SecretString>,
}

impl Identity {
    #[must_use]
    pub fn new(
        provider: ProviderKind,
        subject: String,
        raw_profile: Value,
        access_token: SecretString,
    ) -> Self {
        Self {
            provider,
            subject,
            raw_profile,
            access_token: Some(access_token),
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Provider-side account id, for logs.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn raw_profile(&self) -> &Value {
        &self.raw_profile
    }

    pub(crate) fn access_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("provider", &self.provider)
            .field("subject", &self.subject)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful relationship check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipResult {
    provider: ProviderKind,
    satisfied: bool,
    checked_at_unix: i64,
}

impl RelationshipResult {
    #[must_use]
    pub fn new(provider: ProviderKind, satisfied: bool, checked_at_unix: i64) -> Self {
        Self {
            provider,
            satisfied,
            checked_at_unix,
        }
    }

    /// Result stamped with the current wall clock.
    #[must_use]
    pub fn checked_now(provider: ProviderKind, satisfied: bool) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            });
        Self::new(provider, satisfied, now)
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    #[must_use]
    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    #[must_use]
    pub fn checked_at_unix(&self) -> i64 {
        self.checked_at_unix
    }
}

/// Redirect directive returned by [`ProviderAdapter::begin_handshake`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeginHandshake {
    pub authorize_url: Url,
}

/// Query parameters a provider appends to the callback URL.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Callback query paired with the `state` issued when the handshake began.
#[derive(Clone, Debug, Default)]
pub struct CallbackPayload {
    query: CallbackQuery,
    expected_state: Option<String>,
}

impl CallbackPayload {
    #[must_use]
    pub fn new(query: CallbackQuery, expected_state: Option<String>) -> Self {
        Self {
            query,
            expected_state,
        }
    }

    /// Validate the callback and return the authorization code.
    ///
    /// Consent denial wins over every other check, then the `state` binding,
    /// then the presence of a code.
    ///
    /// # Errors
    /// Returns `HandshakeError` when the provider reported an error, the state
    /// does not match the one issued, or no code was supplied.
    pub fn authorization_code(&self) -> Result<&str, HandshakeError> {
        if let Some(error) = self.query.error.as_deref() {
            let detail = self
                .query
                .error_description
                .as_deref()
                .map_or_else(|| error.to_string(), |desc| format!("{error}: {desc}"));
            return Err(HandshakeError::ConsentDenied(detail));
        }

        match (self.expected_state.as_deref(), self.query.state.as_deref()) {
            (Some(expected), Some(actual)) if !expected.is_empty() && expected == actual => {}
            _ => return Err(HandshakeError::StateMismatch),
        }

        match self.query.code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Ok(code),
            _ => Err(HandshakeError::MalformedCallback(
                "missing authorization code",
            )),
        }
    }
}

/// One identity provider: its OAuth handshake and its relationship predicate.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Account or channel the relationship is evaluated against.
    fn target(&self) -> &str;

    /// Minimum scopes needed to run the relationship check.
    fn scopes(&self) -> &'static [&'static str];

    /// Build the provider consent redirect. No side effects.
    fn begin_handshake(&self, state: &str) -> BeginHandshake;

    /// Exchange the callback for a verified identity.
    async fn complete_handshake(
        &self,
        payload: &CallbackPayload,
    ) -> Result<Identity, HandshakeError>;

    /// Issue exactly one provider API call and evaluate the relationship.
    async fn check_relationship(
        &self,
        identity: &Identity,
    ) -> Result<RelationshipResult, CheckError>;
}

/// Confirm an identity was produced by `expected` and still carries credentials.
pub(crate) fn credentials_for(
    expected: ProviderKind,
    identity: &Identity,
) -> Result<&SecretString, CheckError> {
    if identity.provider() != expected {
        return Err(CheckError::WrongProvider {
            expected,
            found: identity.provider(),
        });
    }
    identity.access_token().ok_or(CheckError::MissingCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(code: Option<&str>, state: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            code: code.map(ToString::to_string),
            state: state.map(ToString::to_string),
            ..CallbackQuery::default()
        }
    }

    #[test]
    fn provider_kind_parses_route_slugs() {
        assert_eq!("github".parse::<ProviderKind>(), Ok(ProviderKind::GitHub));
        assert_eq!("google".parse::<ProviderKind>(), Ok(ProviderKind::Google));
        assert_eq!(
            "twitter".parse::<ProviderKind>(),
            Err(UnknownProvider("twitter".to_string()))
        );
        assert_eq!(
            "twitter".parse::<ProviderKind>().map_err(|e| e.to_string()),
            Err("unknown provider: twitter".to_string())
        );
        assert_eq!(ProviderKind::Google.to_string(), "google");
    }

    #[test]
    fn callback_with_matching_state_yields_code() {
        let payload = CallbackPayload::new(
            query(Some("abc"), Some("nonce")),
            Some("nonce".to_string()),
        );
        assert_eq!(payload.authorization_code(), Ok("abc"));
    }

    #[test]
    fn callback_consent_denied_takes_precedence() {
        let payload = CallbackPayload::new(
            CallbackQuery {
                error: Some("access_denied".to_string()),
                error_description: Some("user said no".to_string()),
                ..CallbackQuery::default()
            },
            None,
        );
        assert_eq!(
            payload.authorization_code(),
            Err(HandshakeError::ConsentDenied(
                "access_denied: user said no".to_string()
            ))
        );
    }

    #[test]
    fn callback_rejects_missing_or_mismatched_state() {
        let missing = CallbackPayload::new(query(Some("abc"), None), Some("nonce".to_string()));
        assert_eq!(
            missing.authorization_code(),
            Err(HandshakeError::StateMismatch)
        );

        let forged = CallbackPayload::new(
            query(Some("abc"), Some("other")),
            Some("nonce".to_string()),
        );
        assert_eq!(
            forged.authorization_code(),
            Err(HandshakeError::StateMismatch)
        );

        let unissued = CallbackPayload::new(query(Some("abc"), Some("nonce")), None);
        assert_eq!(
            unissued.authorization_code(),
            Err(HandshakeError::StateMismatch)
        );
    }

    #[test]
    fn callback_without_code_is_malformed() {
        let payload =
            CallbackPayload::new(query(Some("  "), Some("nonce")), Some("nonce".to_string()));
        assert!(matches!(
            payload.authorization_code(),
            Err(HandshakeError::MalformedCallback(_))
        ));
    }

    #[test]
    fn identity_debug_hides_token() {
        let identity = Identity::new(
            ProviderKind::GitHub,
            "42".to_string(),
            json!({"login": "octocat"}),
            SecretString::from("gho_secret".to_string()),
        );
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("gho_secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn serialized_identity_drops_access_token() -> anyhow::Result<()> {
        let identity = Identity::new(
            ProviderKind::Google,
            "sub-1".to_string(),
            json!({"sub": "sub-1"}),
            SecretString::from("ya29.secret".to_string()),
        );
        let encoded = serde_json::to_string(&identity)?;
        assert!(!encoded.contains("ya29.secret"));

        let decoded: Identity = serde_json::from_str(&encoded)?;
        assert_eq!(decoded.provider(), ProviderKind::Google);
        assert!(decoded.access_token().is_none());
        assert_eq!(
            credentials_for(ProviderKind::Google, &decoded).err(),
            Some(CheckError::MissingCredentials)
        );
        Ok(())
    }

    #[test]
    fn credentials_for_rejects_foreign_identity() {
        let identity = Identity::new(
            ProviderKind::Google,
            "sub-1".to_string(),
            json!({}),
            SecretString::from("token".to_string()),
        );
        assert_eq!(
            credentials_for(ProviderKind::GitHub, &identity).err(),
            Some(CheckError::WrongProvider {
                expected: ProviderKind::GitHub,
                found: ProviderKind::Google,
            })
        );
    }
}
