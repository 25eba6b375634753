//! Session identity store: the per-visitor outcome of a handshake + check.
//!
//! Only the store trait and the explicit `SessionState` schema live here; the
//! cookie transport that carries the session id is in `gate::handlers::session`.

mod memory;

pub use memory::MemorySessionStore;

use crate::provider::{Identity, RelationshipResult};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("relationship result requires an identity of the same provider")]
    InvalidState,
    #[error("unsupported session schema version {0}")]
    UnsupportedVersion(u8),
    #[error("session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to generate session token: {0}")]
    Entropy(String),
}

/// Store key derived from the cookie token and the deployment's session secret.
///
/// The raw cookie value never keys the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn derive(secret: &SecretString, token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.expose_secret().as_bytes());
        hasher.update(b":");
        hasher.update(token.as_bytes());
        Self(Base64UrlUnpadded::encode_string(&hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Create a new random token for a session or OAuth state cookie.
///
/// # Errors
/// Returns `SessionError::Entropy` if the OS RNG fails.
pub fn generate_token() -> Result<String, SessionError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::Entropy(e.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// `(Identity | absent, RelationshipResult | absent)` for one visitor.
///
/// A relationship result can only exist next to an identity of the same
/// provider; both constructors and deserialization enforce it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "SessionRecord", into = "SessionRecord")]
pub struct SessionState {
    identity: Option<Identity>,
    relationship: Option<RelationshipResult>,
}

impl SessionState {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// State after a completed handshake and relationship check.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if the result belongs to another provider.
    pub fn verified(
        identity: Identity,
        relationship: RelationshipResult,
    ) -> Result<Self, SessionError> {
        if identity.provider() != relationship.provider() {
            return Err(SessionError::InvalidState);
        }
        Ok(Self {
            identity: Some(identity),
            relationship: Some(relationship),
        })
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn relationship(&self) -> Option<&RelationshipResult> {
        self.relationship.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identity.is_none()
    }

    /// True only when an identity exists and its check was satisfied.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.identity.is_some()
            && self
                .relationship
                .as_ref()
                .is_some_and(RelationshipResult::satisfied)
    }
}

/// Wire schema for `SessionState`.
#[derive(Clone, Serialize, Deserialize)]
struct SessionRecord {
    version: u8,
    identity: Option<Identity>,
    relationship: Option<RelationshipResult>,
}

impl From<SessionState> for SessionRecord {
    fn from(state: SessionState) -> Self {
        Self {
            version: SCHEMA_VERSION,
            identity: state.identity,
            relationship: state.relationship,
        }
    }
}

impl TryFrom<SessionRecord> for SessionState {
    type Error = SessionError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        if record.version != SCHEMA_VERSION {
            return Err(SessionError::UnsupportedVersion(record.version));
        }
        match (record.identity, record.relationship) {
            (identity, None) => Ok(Self {
                identity,
                relationship: None,
            }),
            (Some(identity), Some(relationship)) => Self::verified(identity, relationship),
            (None, Some(_)) => Err(SessionError::InvalidState),
        }
    }
}

/// Backing store for session state.
///
/// `put` followed by `get` for the same id must observe the written value;
/// ids never see each other's state. Concurrent writers: last write wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Missing or expired sessions read as [`SessionState::empty`].
    async fn get(&self, id: &SessionId) -> Result<SessionState, SessionError>;

    async fn put(&self, id: &SessionId, state: SessionState) -> Result<(), SessionError>;

    async fn clear(&self, id: &SessionId) -> Result<(), SessionError>;
}
