//! Static entry pages and the follow-up page for unmet conditions.

use super::session::{clear_session_cookie, existing_session};
use crate::gate::GateState;
use crate::navigation::{Destination, LOGIN_PATH, VERIFICATION_UNAVAILABLE};
use crate::provider::ProviderKind;
use axum::{
    extract::{Extension, Path, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    error: Option<String>,
}

pub async fn root() -> Redirect {
    Redirect::to(LOGIN_PATH)
}

pub async fn login(
    query: Option<Query<LoginQuery>>,
    gate: Extension<Arc<GateState>>,
) -> Html<String> {
    let mut page = String::from(
        "<!doctype html>\n<html><head><title>Sign in</title></head><body>\n<h1>Sign in</h1>\n",
    );

    let unavailable = query
        .and_then(|Query(query)| query.error)
        .is_some_and(|error| error == VERIFICATION_UNAVAILABLE);
    if unavailable {
        page.push_str("<p>We could not verify your account right now. Please try again.</p>\n");
    }

    page.push_str("<ul>\n");
    for provider in gate.orchestrator().providers() {
        let label = match provider {
            ProviderKind::GitHub => "Continue with GitHub",
            ProviderKind::Google => "Continue with YouTube",
        };
        let _ = writeln!(page, "<li><a href=\"/auth/{provider}\">{label}</a></li>");
    }
    page.push_str("</ul>\n</body></html>\n");

    Html(page)
}

pub async fn condition_unmet(
    Path(provider): Path<String>,
    gate: Extension<Arc<GateState>>,
) -> Response {
    let Ok(provider) = provider.parse::<ProviderKind>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(adapter) = gate.orchestrator().adapter(provider) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match gate.navigation().condition_unmet(provider) {
        Destination::External(url) => Redirect::to(url.as_str()).into_response(),
        Destination::ConditionPage(ProviderKind::GitHub) => {
            format!("Please follow {} on GitHub to continue.", adapter.target()).into_response()
        }
        Destination::ConditionPage(ProviderKind::Google) => format!(
            "Please subscribe to the YouTube channel {} to continue.",
            adapter.target()
        )
        .into_response(),
        Destination::ProtectedResource | Destination::Login { .. } => {
            Redirect::to(LOGIN_PATH).into_response()
        }
    }
}

/// Forget the visitor's state and expire the cookie.
pub async fn logout(headers: HeaderMap, gate: Extension<Arc<GateState>>) -> Response {
    if let Some(session) = existing_session(&headers, gate.session()) {
        gate.orchestrator().end_session(&session).await;
    }

    let mut response_headers = HeaderMap::new();
    match clear_session_cookie(gate.session()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("failed to build session cookie: {err}"),
    }

    (response_headers, Redirect::to(LOGIN_PATH)).into_response()
}
