//! HTTP surface.
//!
//! Layer order, outermost first: request id, request log (`http.request`
//! span plus one `request completed` event), response hardening, CORS, then
//! the router. The server is run with connect info so rate limits key on the
//! socket peer. Authenticated routes additionally pass the admission
//! middleware before their handler runs.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request, Response},
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::notify::{spawn_outbox_worker, EmailWorkerConfig, LogEmailSender};
use crate::cache::PgEphemeralStore;
use crate::clock::{Clock, SystemClock};
use crate::config::AdmissionConfig;

pub mod error;
pub mod handlers;
pub mod middleware;
mod openapi;
pub mod state;

pub use openapi::{openapi, ApiDoc};
pub use state::{AppState, Backends};

use handlers::{
    auth::{login, mfa, oauth, refresh, session, version},
    health, resources,
};
use middleware::{admission, cors, headers};

const REQUEST_ID: &str = "x-request-id";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/auth/verify", get(session::verify))
        .route("/auth/consent", post(session::consent))
        .route("/resource", get(resources::list).post(resources::create))
        .route(
            "/resource/:id",
            get(resources::fetch)
                .put(resources::update)
                .delete(resources::delete),
        )
        .route_layer(from_fn_with_state(state.clone(), admission::admit));

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/auth/login", post(login::login))
        .route("/auth/mfa/verify", post(mfa::verify))
        .route("/auth/mfa/resend", post(mfa::resend))
        .route("/auth/refresh", post(refresh::refresh))
        .route("/auth/logout", post(session::logout))
        .route("/auth/version", get(version::version))
        .route("/auth/oauth/google/start", get(oauth::start))
        .route("/auth/oauth/google/callback", get(oauth::callback));

    let hardening = headers::HardeningPolicy {
        production: state.config.production(),
    };

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(cors::layer())
        .layer(cors::wildcard_fallback());

    headers::harden(app, hardening).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(make_span)
                    .on_response(log_response),
            )
            .layer(Extension(state)),
    )
}

/// Connect, start background workers and serve until Ctrl-C.
///
/// # Errors
/// Returns an error if the database, listener or state cannot be set up.
pub async fn new(
    port: u16,
    dsn: String,
    config: AdmissionConfig,
    email_config: EmailWorkerConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = Backends::postgres(pool.clone(), &config, clock.clone())?;
    let state = Arc::new(AppState::new(config, backends)?);

    spawn_outbox_worker(pool.clone(), Arc::new(LogEmailSender), email_config);
    spawn_sweeper(PgEphemeralStore::new(pool, clock));

    let app = router(state);
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Expired ephemeral rows are only skipped on read; delete them periodically.
fn spawn_sweeper(store: PgEphemeralStore) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "expired ephemeral entries removed"),
                Err(err) => error!("Failed to purge ephemeral entries: {err}"),
            }
        }
    })
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
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
        http.path = %request.uri().path(),
        request_id,
        user_id = tracing::field::Empty,
    )
}

fn log_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    info!(
        status = response.status().as_u16(),
        duration_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        "request completed"
    );
}
