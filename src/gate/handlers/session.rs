//! Cookie transport for the session id and the OAuth `state` nonce.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use secrecy::SecretString;

use crate::provider::ProviderKind;
use crate::session::{generate_token, SessionError, SessionId};

pub const SESSION_COOKIE_NAME: &str = "socialgate_session";
pub const STATE_COOKIE_NAME: &str = "socialgate_oauth_state";

const STATE_COOKIE_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Clone)]
pub struct SessionConfig {
    secret: SecretString,
    ttl_seconds: u64,
    secure: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            secure: false,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    /// Mark cookies `Secure`; only when the gate is served over HTTPS.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"***")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Session resolved for the current request.
pub(super) struct SessionHandle {
    pub(super) id: SessionId,
    /// Present when the visitor had no session cookie yet.
    pub(super) set_cookie: Option<HeaderValue>,
}

/// Resolve the visitor's session, starting a new one if the cookie is missing.
pub(super) fn session_or_new(
    headers: &HeaderMap,
    config: &SessionConfig,
) -> Result<SessionHandle, SessionError> {
    if let Some(id) = existing_session(headers, config) {
        return Ok(SessionHandle { id, set_cookie: None });
    }
    let (id, cookie) = fresh_session(config)?;
    Ok(SessionHandle {
        id,
        set_cookie: Some(cookie),
    })
}

/// Issue a new session token, ignoring any cookie the visitor sent.
pub(super) fn fresh_session(
    config: &SessionConfig,
) -> Result<(SessionId, HeaderValue), SessionError> {
    let token = generate_token()?;
    let cookie = session_cookie(config, &token)
        .map_err(|e| SessionError::Entropy(format!("unusable session token: {e}")))?;
    Ok((SessionId::derive(config.secret(), &token), cookie))
}

pub(super) fn existing_session(headers: &HeaderMap, config: &SessionConfig) -> Option<SessionId> {
    extract_cookie(headers, SESSION_COOKIE_NAME)
        .filter(|token| !token.is_empty())
        .map(|token| SessionId::derive(config.secret(), &token))
}

/// Nonce issued for `provider` when its handshake began, if any.
pub(super) fn expected_state(headers: &HeaderMap, provider: ProviderKind) -> Option<String> {
    let value = extract_cookie(headers, STATE_COOKIE_NAME)?;
    let (slug, nonce) = value.split_once('.')?;
    (slug == provider.slug() && !nonce.is_empty()).then(|| nonce.to_string())
}

fn build_cookie(config: &SessionConfig, name: &str, value: &str, max_age: u64) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if config.secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    config: &SessionConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&build_cookie(
        config,
        SESSION_COOKIE_NAME,
        token,
        config.ttl_seconds(),
    ))
}

pub(super) fn clear_session_cookie(
    config: &SessionConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&build_cookie(config, SESSION_COOKIE_NAME, "", 0))
}

/// Short-lived cookie binding the callback to the handshake that began it.
pub(super) fn state_cookie(
    config: &SessionConfig,
    provider: ProviderKind,
    nonce: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&build_cookie(
        config,
        STATE_COOKIE_NAME,
        &format!("{}.{nonce}", provider.slug()),
        STATE_COOKIE_TTL_SECONDS,
    ))
}

pub(super) fn clear_state_cookie(
    config: &SessionConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&build_cookie(config, STATE_COOKIE_NAME, "", 0))
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
}
