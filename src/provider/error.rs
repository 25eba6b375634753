use super::ProviderKind;
use thiserror::Error;

/// Failures while turning a provider callback into a verified identity.
///
/// Every variant is terminal for the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("provider denied consent: {0}")]
    ConsentDenied(String),
    #[error("malformed callback: {0}")]
    MalformedCallback(&'static str),
    #[error("oauth state mismatch")]
    StateMismatch,
    #[error("token exchange rejected: {0}")]
    TokenRejected(String),
    #[error("profile unavailable: {0}")]
    ProfileUnavailable(String),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handshake timed out")]
    Timeout,
}

impl HandshakeError {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failures of the relationship check itself.
///
/// An unmet condition is not an error; see [`super::RelationshipResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("identity belongs to {found}, adapter expects {expected}")]
    WrongProvider {
        expected: ProviderKind,
        found: ProviderKind,
    },
    #[error("identity carries no access token")]
    MissingCredentials,
    #[error("provider rejected credentials with status {0}")]
    Unauthorized(u16),
    #[error("unexpected provider status {0}")]
    UnexpectedStatus(u16),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("relationship check timed out")]
    Timeout,
}

impl CheckError {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            code @ (401 | 403) => Self::Unauthorized(code),
            code => Self::UnexpectedStatus(code),
        }
    }
}
