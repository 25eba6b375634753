//! Navigation resolver: pure mapping from a gate outcome to a redirect target.

use crate::orchestrator::{DenialCause, GateOutcome};
use crate::provider::ProviderKind;
use url::Url;

pub const LOGIN_PATH: &str = "/login";
pub const PROTECTED_PATH: &str = "/protected";
pub const CONDITION_UNMET_PREFIX: &str = "/condition-unmet";

/// Query value `/login` receives when the relationship could not be verified.
pub const VERIFICATION_UNAVAILABLE: &str = "verification_unavailable";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    ProtectedResource,
    /// Local page asking the visitor to establish the relationship.
    ConditionPage(ProviderKind),
    /// Provider-hosted prompt.
    External(Url),
    Login {
        error: Option<&'static str>,
    },
}

impl Destination {
    /// Value for the `Location` header.
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            Self::ProtectedResource => PROTECTED_PATH.to_string(),
            Self::ConditionPage(provider) => format!("{CONDITION_UNMET_PREFIX}/{provider}"),
            Self::External(url) => url.to_string(),
            Self::Login { error: None } => LOGIN_PATH.to_string(),
            Self::Login { error: Some(code) } => format!("{LOGIN_PATH}?error={code}"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NavigationResolver {
    subscription_prompt: Option<Url>,
}

impl NavigationResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// External page used when a Google visitor is not subscribed.
    #[must_use]
    pub fn with_subscription_prompt(mut self, url: Url) -> Self {
        self.subscription_prompt = Some(url);
        self
    }

    #[must_use]
    pub fn resolve(&self, outcome: &GateOutcome) -> Destination {
        match outcome {
            GateOutcome::Granted { .. } => Destination::ProtectedResource,
            GateOutcome::ConditionUnmet { provider } => self.condition_unmet(*provider),
            GateOutcome::Denied {
                cause: DenialCause::Handshake,
                ..
            } => Destination::Login { error: None },
            GateOutcome::Denied {
                cause: DenialCause::Check | DenialCause::Session,
                ..
            } => Destination::Login {
                error: Some(VERIFICATION_UNAVAILABLE),
            },
        }
    }

    /// Next step for a visitor whose relationship condition is not met.
    #[must_use]
    pub fn condition_unmet(&self, provider: ProviderKind) -> Destination {
        match (provider, &self.subscription_prompt) {
            (ProviderKind::GitHub, _) | (ProviderKind::Google, None) => {
                Destination::ConditionPage(provider)
            }
            (ProviderKind::Google, Some(prompt)) => Destination::External(prompt.clone()),
        }
    }
}
