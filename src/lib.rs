//! # Socialgate (social-proof access gate)
//!
//! `socialgate` puts a protected page behind a two-stage check: the visitor
//! signs in with an identity provider, then the provider's own API is asked
//! whether that account satisfies a relationship condition.
//!
//! ## Providers
//!
//! - **GitHub:** the account must follow a configured target account
//!   (`GET /user/following/{target}` answers `204`).
//! - **Google:** the account must be subscribed to a configured YouTube
//!   channel (`subscriptions.list` returns at least one item).
//!
//! ## Flow
//!
//! `START -> PROVIDER_REDIRECTED -> HANDSHAKE_COMPLETE -> CHECK_COMPLETE`, ending
//! in `GRANTED`, `CONDITION_UNMET` or `DENIED`. The outcome is written to the
//! session store before the visitor is redirected, so `/protected` only reads
//! the stored result and never calls a provider.
//!
//! Provider failures never reach the visitor verbatim: handshake failures send
//! the visitor back to `/login`, check failures to `/login` with a generic notice.

pub mod cli;
pub mod gate;
pub mod navigation;
pub mod orchestrator;
pub mod provider;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
