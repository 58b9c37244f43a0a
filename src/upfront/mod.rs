//! Magic-link sign-in and purchase-gated account provisioning.

pub mod challenge;
pub mod clock;
pub mod config;
pub mod email;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod issuer;
pub mod keys;
pub mod openapi;
pub mod payment;
pub mod provisioner;
pub mod store;
pub mod token;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::error::{Error, ErrorBody};

use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Context, Result};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header},
    routing::{get, post},
};
use challenge::{ChallengeHooks, MagicLinkHooks};
use config::UpfrontConfig;
use email::EmailSender;
use identity::IdentityProvider;
use issuer::ChallengeIssuer;
use keys::KeyService;
use payment::PaymentGateway;
use provisioner::Provisioner;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use store::ResourceStore;
use token::TokenCodec;
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug_span, info, warn};
use ulid::Ulid;
use verifier::ChallengeVerifier;

/// Everything a request handler needs, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<UpfrontConfig>,
    pub issuer: ChallengeIssuer,
    pub hooks: Arc<dyn ChallengeHooks>,
    pub provisioner: Provisioner,
    pub store: Arc<dyn ResourceStore>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: UpfrontConfig,
        keys: Arc<dyn KeyService>,
        store: Arc<dyn ResourceStore>,
        identity: Arc<dyn IdentityProvider>,
        payments: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        let config = Arc::new(config);
        let codec = TokenCodec::new(keys);
        let issuer = ChallengeIssuer::new(
            config.clone(),
            codec.clone(),
            store.clone(),
            identity.clone(),
            email,
        );
        let hooks = Arc::new(MagicLinkHooks::new(ChallengeVerifier::new(codec)));
        let provisioner = Provisioner::new(store.clone(), payments, identity);

        Self {
            config,
            issuer,
            hooks,
            provisioner,
            store,
        }
    }
}

/// Build the HTTP router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    let cors = cors(state.config.allowed_origins());

    Router::new()
        .route(
            "/health",
            get(handlers::health).options(handlers::health),
        )
        .route("/upfront/start-challenge", post(handlers::start_challenge))
        .route(
            "/upfront/validate-purchase/:id",
            get(handlers::validate_purchase),
        )
        .route(
            "/hooks/define-auth-challenge",
            post(handlers::define_auth_challenge),
        )
        .route(
            "/hooks/create-auth-challenge",
            post(handlers::create_auth_challenge),
        )
        .route(
            "/hooks/verify-auth-challenge",
            post(handlers::verify_auth_challenge),
        )
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::openapi()) }),
        )
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
                .layer(cors)
                .layer(Extension(state)),
        )
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Connect to Postgres.
/// # Errors
/// Returns an error if the database cannot be reached.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

/// Serve the API until a Vault lease can no longer be renewed.
/// # Errors
/// Returns an error if the server fails to start
pub async fn new(port: u16, globals: &GlobalArgs, state: AppState) -> Result<()> {
    // Renew vault token, gracefully shutdown if failed
    let (tx, mut rx) = mpsc::unbounded_channel();

    vault::renew::try_renew(globals, tx).await?;

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            warn!("Vault lease renewal failed, shutting down");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let method = request.method().as_str();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(path, MatchedPath::as_str);
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", method, route, path, request_id)
}
