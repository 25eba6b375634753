//! `/auth/:provider` and its callback.
//!
//! The state nonce travels in a short-lived cookie scoped to the provider;
//! the callback compares it against the `state` query parameter before any
//! code exchange happens.

use super::session::{
    clear_state_cookie, expected_state, fresh_session, session_or_new, state_cookie,
};
use crate::gate::GateState;
use crate::navigation::LOGIN_PATH;
use crate::orchestrator::{DenialCause, GateOutcome};
use crate::provider::{CallbackPayload, CallbackQuery, ProviderKind};
use crate::session::{generate_token, SessionError, SessionId};
use axum::{
    extract::{Extension, Path, Query},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Parse the path segment into a provider this gate has configured.
fn configured(gate: &GateState, provider: &str) -> Option<ProviderKind> {
    let kind = provider.parse::<ProviderKind>().ok()?;
    gate.orchestrator().adapter(kind).map(|_| kind)
}

pub async fn begin(
    Path(provider): Path<String>,
    headers: HeaderMap,
    gate: Extension<Arc<GateState>>,
) -> Response {
    let Some(provider) = configured(&gate, &provider) else {
        debug!("unknown provider requested: {provider}");
        return StatusCode::NOT_FOUND.into_response();
    };

    let session = match session_or_new(&headers, gate.session()) {
        Ok(session) => session,
        Err(err) => {
            error!(%provider, "failed to start session: {err}");
            return Redirect::to(LOGIN_PATH).into_response();
        }
    };

    let nonce = match generate_token() {
        Ok(nonce) => nonce,
        Err(err) => {
            error!(%provider, "failed to generate state nonce: {err}");
            return Redirect::to(LOGIN_PATH).into_response();
        }
    };

    let Some(handshake) = gate.orchestrator().begin(provider, &nonce) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response_headers = HeaderMap::new();
    if let Some(cookie) = session.set_cookie {
        response_headers.append(SET_COOKIE, cookie);
    }
    match state_cookie(gate.session(), provider, &nonce) {
        Ok(cookie) => {
            response_headers.append(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!(%provider, "failed to build state cookie: {err}");
            return Redirect::to(LOGIN_PATH).into_response();
        }
    }

    (response_headers, Redirect::to(handshake.authorize_url.as_str())).into_response()
}

pub async fn callback(
    Path(provider): Path<String>,
    query: Option<Query<CallbackQuery>>,
    headers: HeaderMap,
    gate: Extension<Arc<GateState>>,
) -> Response {
    let Some(provider) = configured(&gate, &provider) else {
        debug!("callback for unknown provider: {provider}");
        return StatusCode::NOT_FOUND.into_response();
    };

    let session = match session_or_new(&headers, gate.session()) {
        Ok(session) => session,
        Err(err) => {
            error!(%provider, "failed to resolve session: {err}");
            return Redirect::to(LOGIN_PATH).into_response();
        }
    };

    // Unparseable query strings are treated as a callback with nothing in it.
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let payload = CallbackPayload::new(query, expected_state(&headers, provider));

    let mut outcome = gate
        .orchestrator()
        .complete(&session.id, provider, &payload)
        .await;

    let mut set_cookie = session.set_cookie;
    if let GateOutcome::Granted { .. } = outcome {
        // The pre-login token must not carry the grant.
        match rotate(&gate, &session.id).await {
            Ok(cookie) => set_cookie = Some(cookie),
            Err(err) => {
                error!(%provider, "failed to rotate session: {err}");
                gate.orchestrator().end_session(&session.id).await;
                outcome = GateOutcome::Denied {
                    provider,
                    cause: DenialCause::Session,
                };
            }
        }
    }
    let destination = gate.navigation().resolve(&outcome);

    let mut response_headers = HeaderMap::new();
    if let Some(cookie) = set_cookie {
        response_headers.append(SET_COOKIE, cookie);
    }
    // The nonce is single use whatever the outcome.
    match clear_state_cookie(gate.session()) {
        Ok(cookie) => {
            response_headers.append(SET_COOKIE, cookie);
        }
        Err(err) => error!("failed to build state cookie: {err}"),
    }

    (response_headers, Redirect::to(&destination.location())).into_response()
}

/// Move the granted state to a freshly issued session and return its cookie.
async fn rotate(gate: &GateState, from: &SessionId) -> Result<HeaderValue, SessionError> {
    let (to, cookie) = fresh_session(gate.session())?;
    gate.orchestrator().rotate_session(from, &to).await?;
    Ok(cookie)
}
