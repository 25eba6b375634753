//! HTTP surface: router, per-request tracing and the listening socket.

use crate::navigation::{NavigationResolver, CONDITION_UNMET_PREFIX, LOGIN_PATH, PROTECTED_PATH};
use crate::orchestrator::GatingOrchestrator;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;

pub mod handlers;

pub use handlers::SessionConfig;
use handlers::{auth, health, pages, protected};

/// Everything a request handler needs, shared behind one `Arc`.
#[derive(Debug)]
pub struct GateState {
    orchestrator: GatingOrchestrator,
    navigation: NavigationResolver,
    session: SessionConfig,
}

impl GateState {
    #[must_use]
    pub fn new(
        orchestrator: GatingOrchestrator,
        navigation: NavigationResolver,
        session: SessionConfig,
    ) -> Self {
        Self {
            orchestrator,
            navigation,
            session,
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &GatingOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn navigation(&self) -> &NavigationResolver {
        &self.navigation
    }

    #[must_use]
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }
}

/// Build the gate router with its tracing and request-id layers.
#[must_use]
pub fn router(state: Arc<GateState>) -> Router {
    Router::new()
        .route("/", get(pages::root))
        .route(LOGIN_PATH, get(pages::login))
        .route("/logout", get(pages::logout))
        .route(PROTECTED_PATH, get(protected::protected))
        .route(
            &format!("{CONDITION_UNMET_PREFIX}/:provider"),
            get(pages::condition_unmet),
        )
        .route("/auth/:provider", get(auth::begin))
        .route("/auth/:provider/callback", get(auth::callback))
        .route("/health", get(health::health).options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn new(port: u16, state: Arc<GateState>) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind [::]:{port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
