//! Route handlers for the gate.
//!
//! Handlers never surface provider errors: every callback ends in a redirect
//! chosen by the navigation resolver.

pub mod auth;
pub mod health;
pub mod pages;
pub mod protected;
pub mod session;

pub use self::session::{SessionConfig, SESSION_COOKIE_NAME, STATE_COOKIE_NAME};
