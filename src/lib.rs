//! ldapsync authenticates users against an LDAP directory and mirrors them,
//! with their groups, into Mattermost.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod ldap;
pub mod mattermost;
mod router;
pub mod sync;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::middleware as AxumMiddleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::ldap::Directory;
use crate::mattermost::{MattermostClient, Platform};
use crate::sync::{SyncSettings, Synchronizer};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub ldap: Arc<dyn Directory>,
    /// Absent when Mattermost is not configured.
    pub sync: Option<Arc<Synchronizer>>,
    pub metrics: Option<PrometheusHandle>,
    /// Background syncs started by logins.
    pub tasks: TaskTracker,
}

/// Prometheus exposition.
async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .route("/metrics", get(prometheus))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // initialize LDAP.
    let Some(cfg) = &config.ldap else {
        return Err("missing `ldap` entry on `config.yaml` file".into());
    };

    let ldap_config = ldap::LdapConfig::new(
        &cfg.address,
        &cfg.users_dn,
        cfg.users_filter.clone(),
        cfg.attributes.clone(),
    )?;
    let ldap: Arc<dyn Directory> = Arc::new(
        ldap::Ldap::connect(
            ldap_config,
            cfg.user.as_deref(),
            cfg.password.as_deref(),
        )
        .await?,
    );

    // handle mattermost session.
    let sync = if let Some(mm) = &config.mattermost {
        let client = match (&mm.token, &mm.username, &mm.password) {
            (Some(token), _, _) => {
                MattermostClient::with_token(&mm.url, token, mm.timeout())?
            },
            (None, Some(username), Some(password)) => {
                MattermostClient::login(
                    &mm.url,
                    username,
                    password,
                    mm.timeout(),
                )
                .await?
            },
            _ => {
                return Err("`mattermost` entry needs `token` or \
                            `username` and `password`"
                    .into());
            },
        };
        let platform: Arc<dyn Platform> = Arc::new(client);

        let settings = SyncSettings {
            users_dn: cfg.users_dn.clone(),
            groups_dn: cfg.groups_dn().to_owned(),
            auth_service: mm.auth_service().to_owned(),
        };

        Some(Arc::new(Synchronizer::new(Arc::clone(&ldap), platform, settings)))
    } else {
        tracing::warn!("missing `mattermost` entry, synchronization disabled");
        None
    };

    Ok(AppState {
        config,
        ldap,
        sync,
        metrics,
        tasks: TaskTracker::new(),
    })
}

/// Serve on `port` until ctrl-c, then release the state.
///
/// The state is released whether serving succeeded or not.
pub async fn serve(
    state: AppState,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let served = listen(state.clone(), port).await;
    shutdown(&state).await;
    served
}

async fn listen(
    state: AppState,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(%port, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for running syncs, then unbind the directory connection.
pub async fn shutdown(state: &AppState) {
    state.tasks.close();
    if !state.tasks.is_empty() {
        tracing::info!(pending = state.tasks.len(), "waiting for running syncs");
    }
    state.tasks.wait().await;

    if let Err(err) = state.ldap.close().await {
        tracing::error!(error = %err, "ldap connection not closed");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
