//! Gating orchestrator: handshake, relationship check, persisted outcome.
//!
//! Per visitor the flow is
//! `START -> PROVIDER_REDIRECTED -> HANDSHAKE_COMPLETE -> CHECK_COMPLETE`
//! ending in `GRANTED`, `CONDITION_UNMET` or `DENIED`. The check only ever runs
//! on the `Identity` value the handshake returned, so it cannot start early.

use crate::provider::{
    BeginHandshake, CallbackPayload, CheckError, HandshakeError, ProviderAdapter, ProviderKind,
};
use crate::session::{SessionError, SessionId, SessionState, SessionStore};
use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Named points of the per-visitor state machine, used in logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowStage {
    ProviderRedirected,
    HandshakeComplete,
    CheckComplete,
    Granted,
    ConditionUnmet,
    Denied,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProviderRedirected => "PROVIDER_REDIRECTED",
            Self::HandshakeComplete => "HANDSHAKE_COMPLETE",
            Self::CheckComplete => "CHECK_COMPLETE",
            Self::Granted => "GRANTED",
            Self::ConditionUnmet => "CONDITION_UNMET",
            Self::Denied => "DENIED",
        };
        f.write_str(name)
    }
}

/// Why a flow ended in `DENIED`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DenialCause {
    /// Consent, callback, token exchange or profile failure.
    Handshake,
    /// The relationship check could not be evaluated.
    Check,
    /// The outcome could not be persisted.
    Session,
}

/// Terminal state of one callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateOutcome {
    Granted {
        provider: ProviderKind,
    },
    ConditionUnmet {
        provider: ProviderKind,
    },
    Denied {
        provider: ProviderKind,
        cause: DenialCause,
    },
}

impl GateOutcome {
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Granted { provider }
            | Self::ConditionUnmet { provider }
            | Self::Denied { provider, .. } => *provider,
        }
    }

    #[must_use]
    pub fn stage(&self) -> FlowStage {
        match self {
            Self::Granted { .. } => FlowStage::Granted,
            Self::ConditionUnmet { .. } => FlowStage::ConditionUnmet,
            Self::Denied { .. } => FlowStage::Denied,
        }
    }
}

pub struct GatingOrchestrator {
    adapters: BTreeMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    store: Arc<dyn SessionStore>,
    handshake_timeout: Duration,
    check_timeout: Duration,
}

impl GatingOrchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            adapters: BTreeMap::new(),
            store,
            handshake_timeout: DEFAULT_PROVIDER_TIMEOUT,
            check_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Register an adapter; a later adapter of the same kind replaces the earlier one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        self.handshake_timeout = limit;
        self
    }

    #[must_use]
    pub fn with_check_timeout(mut self, limit: Duration) -> Self {
        self.check_timeout = limit;
        self
    }

    /// Enabled providers, in stable order.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }

    #[must_use]
    pub fn adapter(&self, provider: ProviderKind) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider)
    }

    /// Enter `PROVIDER_REDIRECTED`. `None` if the provider is not configured.
    #[must_use]
    pub fn begin(&self, provider: ProviderKind, state: &str) -> Option<BeginHandshake> {
        let adapter = self.adapters.get(&provider)?;
        info!(%provider, stage = %FlowStage::ProviderRedirected, "redirecting to provider");
        Some(adapter.begin_handshake(state))
    }

    /// Run the callback to a terminal outcome and persist the resulting state.
    ///
    /// Never fails: every adapter or store error is folded into `DENIED`.
    #[instrument(skip(self, session, payload), fields(session = %session.as_str()))]
    pub async fn complete(
        &self,
        session: &SessionId,
        provider: ProviderKind,
        payload: &CallbackPayload,
    ) -> GateOutcome {
        let denied = |cause| GateOutcome::Denied { provider, cause };

        let Some(adapter) = self.adapters.get(&provider) else {
            warn!(%provider, "callback for unconfigured provider");
            self.reset(session).await;
            return denied(DenialCause::Handshake);
        };

        // PROVIDER_REDIRECTED -> HANDSHAKE_COMPLETE
        let handshake = timeout(self.handshake_timeout, adapter.complete_handshake(payload))
            .await
            .unwrap_or(Err(HandshakeError::Timeout));

        let identity = match handshake {
            Ok(identity) => identity,
            Err(err) => {
                warn!(%provider, stage = %FlowStage::Denied, "handshake failed: {err}");
                self.reset(session).await;
                return denied(DenialCause::Handshake);
            }
        };

        info!(%provider, subject = %identity.subject(), stage = %FlowStage::HandshakeComplete);

        // HANDSHAKE_COMPLETE -> CHECK_COMPLETE
        let check = timeout(self.check_timeout, adapter.check_relationship(&identity))
            .await
            .unwrap_or(Err(CheckError::Timeout));

        let relationship = match check {
            Ok(relationship) => relationship,
            Err(err) => {
                error!(
                    %provider,
                    subject = %identity.subject(),
                    stage = %FlowStage::Denied,
                    "relationship check failed: {err}"
                );
                self.reset(session).await;
                return denied(DenialCause::Check);
            }
        };

        info!(%provider, satisfied = relationship.satisfied(), stage = %FlowStage::CheckComplete);

        let outcome = if relationship.satisfied() {
            GateOutcome::Granted { provider }
        } else {
            GateOutcome::ConditionUnmet { provider }
        };

        // Identity and result land in one write.
        let state = match SessionState::verified(identity, relationship) {
            Ok(state) => state,
            Err(err) => {
                error!(%provider, "adapter returned an inconsistent result: {err}");
                self.reset(session).await;
                return denied(DenialCause::Check);
            }
        };

        if let Err(err) = self.store.put(session, state).await {
            error!(%provider, "failed to persist session state: {err}");
            self.reset(session).await;
            return denied(DenialCause::Session);
        }

        info!(%provider, stage = %outcome.stage(), "gate resolved");

        outcome
    }

    /// Current state for a session; store failures read as empty.
    pub async fn session_state(&self, session: &SessionId) -> SessionState {
        match self.store.get(session).await {
            Ok(state) => state,
            Err(err) => {
                error!("failed to read session state: {err}");
                SessionState::empty()
            }
        }
    }

    /// Move the state held under `from` to `to` and clear `from`.
    ///
    /// Called after a grant so the identifier issued before login stops working.
    ///
    /// # Errors
    /// Returns the store error if the state cannot be read or written. `from` is
    /// cleared in that case too, so a failed rotation never leaves a grant behind.
    pub async fn rotate_session(
        &self,
        from: &SessionId,
        to: &SessionId,
    ) -> Result<(), SessionError> {
        let moved = match self.store.get(from).await {
            Ok(state) => self.store.put(to, state).await,
            Err(err) => Err(err),
        };
        self.reset(from).await;
        if moved.is_err() {
            self.reset(to).await;
        }
        moved
    }

    /// Drop whatever the session holds.
    pub async fn end_session(&self, session: &SessionId) {
        self.reset(session).await;
    }

    async fn reset(&self, session: &SessionId) {
        if let Err(err) = self.store.clear(session).await {
            error!("failed to clear session state: {err}");
        }
    }
}

impl fmt::Debug for GatingOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatingOrchestrator")
            .field("providers", &self.providers())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("check_timeout", &self.check_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::{CallbackQuery, Identity, RelationshipResult};
    use crate::session::MemorySessionStore;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted adapter: fixed handshake and check behaviour, counts check calls.
    struct ScriptedAdapter {
        kind: ProviderKind,
        handshake: Result<(), HandshakeError>,
        check: Result<bool, CheckError>,
        handshake_delay: Duration,
        check_delay: Duration,
        checks: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(
            kind: ProviderKind,
            handshake: Result<(), HandshakeError>,
            check: Result<bool, CheckError>,
        ) -> Self {
            Self {
                kind,
                handshake,
                check,
                handshake_delay: Duration::ZERO,
                check_delay: Duration::ZERO,
                checks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn target(&self) -> &str {
            "target"
        }

        fn scopes(&self) -> &'static [&'static str] {
            &["read"]
        }

        fn begin_handshake(&self, state: &str) -> BeginHandshake {
            let mut authorize_url = url::Url::parse("https://provider.test/authorize").unwrap();
            authorize_url.query_pairs_mut().append_pair("state", state);
            BeginHandshake { authorize_url }
        }

        async fn complete_handshake(
            &self,
            payload: &CallbackPayload,
        ) -> Result<Identity, HandshakeError> {
            payload.authorization_code()?;
            tokio::time::sleep(self.handshake_delay).await;
            self.handshake.clone()?;
            Ok(Identity::new(
                self.kind,
                "subject-1".to_string(),
                json!({"login": "viewer"}),
                SecretString::from("token".to_string()),
            ))
        }

        async fn check_relationship(
            &self,
            identity: &Identity,
        ) -> Result<RelationshipResult, CheckError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.check_delay).await;
            let satisfied = self.check.clone()?;
            Ok(RelationshipResult::checked_now(identity.provider(), satisfied))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn get(&self, _id: &SessionId) -> Result<SessionState, SessionError> {
            Err(SessionError::InvalidState)
        }

        async fn put(&self, _id: &SessionId, _state: SessionState) -> Result<(), SessionError> {
            Err(SessionError::InvalidState)
        }

        async fn clear(&self, _id: &SessionId) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn session() -> SessionId {
        SessionId::derive(&SecretString::from("secret".to_string()), "visitor")
    }

    fn callback() -> CallbackPayload {
        CallbackPayload::new(
            CallbackQuery {
                code: Some("code".to_string()),
                state: Some("nonce".to_string()),
                ..CallbackQuery::default()
            },
            Some("nonce".to_string()),
        )
    }

    fn orchestrator(adapter: ScriptedAdapter) -> (GatingOrchestrator, Arc<ScriptedAdapter>) {
        let adapter = Arc::new(adapter);
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let orchestrator = GatingOrchestrator::new(store).with_adapter(adapter.clone());
        (orchestrator, adapter)
    }

    #[tokio::test]
    async fn satisfied_check_is_granted_and_persisted() {
        let (gate, _) = orchestrator(ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true)));

        let outcome = gate.complete(&session(), ProviderKind::GitHub, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Granted {
                provider: ProviderKind::GitHub
            }
        );
        assert_eq!(outcome.stage(), FlowStage::Granted);
        assert!(gate.session_state(&session()).await.is_granted());
    }

    #[tokio::test]
    async fn unsatisfied_check_is_condition_unmet() {
        let (gate, _) = orchestrator(ScriptedAdapter::new(ProviderKind::Google, Ok(()), Ok(false)));

        let outcome = gate.complete(&session(), ProviderKind::Google, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::ConditionUnmet {
                provider: ProviderKind::Google
            }
        );
        let state = gate.session_state(&session()).await;
        assert!(!state.is_granted());
        assert_eq!(state.relationship().map(RelationshipResult::satisfied), Some(false));
    }

    #[tokio::test]
    async fn handshake_error_denies_without_checking() {
        let (gate, adapter) = orchestrator(ScriptedAdapter::new(
            ProviderKind::GitHub,
            Err(HandshakeError::TokenRejected("bad_verification_code".to_string())),
            Ok(true),
        ));

        let outcome = gate.complete(&session(), ProviderKind::GitHub, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                provider: ProviderKind::GitHub,
                cause: DenialCause::Handshake
            }
        );
        assert_eq!(adapter.checks.load(Ordering::SeqCst), 0);
        assert!(gate.session_state(&session()).await.relationship().is_none());
    }

    #[tokio::test]
    async fn check_error_is_distinct_from_unmet_and_clears_grant() {
        let (gate, _) = orchestrator(ScriptedAdapter::new(
            ProviderKind::GitHub,
            Ok(()),
            Err(CheckError::Transport("connection reset".to_string())),
        ));

        // A grant from an earlier attempt must not survive a failed one.
        let previous = SessionState::verified(
            Identity::new(
                ProviderKind::GitHub,
                "subject-1".to_string(),
                json!({}),
                SecretString::from("old".to_string()),
            ),
            RelationshipResult::new(ProviderKind::GitHub, true, 0),
        );
        if let Ok(previous) = previous {
            let _ = gate.store.put(&session(), previous).await;
        }

        let outcome = gate.complete(&session(), ProviderKind::GitHub, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                provider: ProviderKind::GitHub,
                cause: DenialCause::Check
            }
        );
        assert!(!gate.session_state(&session()).await.is_granted());
    }

    #[tokio::test]
    async fn slow_check_times_out_as_check_failure() {
        let mut adapter = ScriptedAdapter::new(ProviderKind::Google, Ok(()), Ok(true));
        adapter.check_delay = Duration::from_millis(200);
        let (gate, _) = orchestrator(adapter);
        let gate = gate.with_check_timeout(Duration::from_millis(20));

        let outcome = gate.complete(&session(), ProviderKind::Google, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                provider: ProviderKind::Google,
                cause: DenialCause::Check
            }
        );
        assert!(!gate.session_state(&session()).await.is_granted());
    }

    #[tokio::test]
    async fn slow_handshake_times_out_as_handshake_denial() {
        let mut adapter = ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true));
        adapter.handshake_delay = Duration::from_millis(200);
        let (gate, adapter) = orchestrator(adapter);
        let gate = gate.with_handshake_timeout(Duration::from_millis(20));

        let outcome = gate.complete(&session(), ProviderKind::GitHub, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                provider: ProviderKind::GitHub,
                cause: DenialCause::Handshake
            }
        );
        assert_eq!(adapter.checks.load(Ordering::SeqCst), 0);
        assert!(gate.session_state(&session()).await.is_empty());
    }

    #[tokio::test]
    async fn forged_state_is_a_handshake_denial() {
        let (gate, adapter) =
            orchestrator(ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true)));
        let payload = CallbackPayload::new(
            CallbackQuery {
                code: Some("code".to_string()),
                state: Some("forged".to_string()),
                ..CallbackQuery::default()
            },
            Some("nonce".to_string()),
        );

        let outcome = gate.complete(&session(), ProviderKind::GitHub, &payload).await;
        assert_eq!(outcome.stage(), FlowStage::Denied);
        assert_eq!(adapter.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_denied() {
        let (gate, _) = orchestrator(ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true)));
        assert!(gate.begin(ProviderKind::Google, "nonce").is_none());

        let outcome = gate.complete(&session(), ProviderKind::Google, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                provider: ProviderKind::Google,
                cause: DenialCause::Handshake
            }
        );
    }

    #[tokio::test]
    async fn store_failure_is_a_session_denial() {
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true)));
        let gate = GatingOrchestrator::new(Arc::new(FailingStore)).with_adapter(adapter);

        let outcome = gate.complete(&session(), ProviderKind::GitHub, &callback()).await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                provider: ProviderKind::GitHub,
                cause: DenialCause::Session
            }
        );
        assert!(gate.session_state(&session()).await.is_empty());
    }

    #[tokio::test]
    async fn begin_passes_state_to_adapter() {
        let (gate, _) = orchestrator(ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true)));
        let begin = gate.begin(ProviderKind::GitHub, "nonce-123");
        let state = begin.and_then(|begin| {
            begin
                .authorize_url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
        });
        assert_eq!(state.as_deref(), Some("nonce-123"));
        assert_eq!(gate.providers(), vec![ProviderKind::GitHub]);
    }

    #[tokio::test]
    async fn rotation_moves_the_grant_to_the_new_session() {
        let (gate, _) = orchestrator(ScriptedAdapter::new(ProviderKind::GitHub, Ok(()), Ok(true)));
        let before = session();
        let after = SessionId::derive(&SecretString::from("secret".to_string()), "rotated");

        let outcome = gate.complete(&before, ProviderKind::GitHub, &callback()).await;
        assert_eq!(outcome.stage(), FlowStage::Granted);

        gate.rotate_session(&before, &after).await.unwrap();
        assert!(gate.session_state(&after).await.is_granted());
        assert!(gate.session_state(&before).await.is_empty());
    }

    #[tokio::test]
    async fn failed_rotation_clears_the_old_session() {
        let gate = GatingOrchestrator::new(Arc::new(FailingStore));
        let after = SessionId::derive(&SecretString::from("secret".to_string()), "rotated");

        let result = gate.rotate_session(&session(), &after).await;
        assert!(matches!(result, Err(SessionError::InvalidState)));
    }
}
