use super::session::existing_session;
use crate::gate::GateState;
use crate::navigation::LOGIN_PATH;
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::debug;

const PROTECTED_PAGE: &str = "<!doctype html>\n<html><head><title>Welcome</title></head>\
<body><h1>Welcome</h1><p>Thanks for your support.</p>\
<p><a href=\"/logout\">Sign out</a></p></body></html>\n";

/// Serves the resource only to sessions holding a satisfied result.
///
/// Reads stored state only; providers are never contacted here.
pub async fn protected(headers: HeaderMap, gate: Extension<Arc<GateState>>) -> Response {
    let Some(session) = existing_session(&headers, gate.session()) else {
        return Redirect::to(LOGIN_PATH).into_response();
    };

    if !gate.orchestrator().session_state(&session).await.is_granted() {
        debug!("session without a satisfied result");
        return Redirect::to(LOGIN_PATH).into_response();
    }

    Html(PROTECTED_PAGE).into_response()
}
